use clap::Parser;
use tokio::signal;

use tracing_subscriber::fmt;
use tracing::{error, info};

use server::{ChatError, ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    let config = ServerConfig::parse();

    fmt()
        .compact() // use abbreviated log format
        .with_max_level(config.log_level())
        .with_thread_ids(true) // display thread id where event happens
        .init(); // set as default subscriber

    let server = ChatServer::new(config);

    let listener = server.bind().await
        .map_err(|e| { error!("Server failed to start: {}", e); e })?;

    if let Ok(addr) = listener.local_addr() {
        info!("Server started, listening on {:?}", addr);
    }

    server.serve(listener, async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }).await;

    info!("Server exiting");
    Ok(())
}
