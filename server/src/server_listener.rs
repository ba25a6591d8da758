use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time;
use tracing::{error, info};

use crate::client_handler::ClientHandler;
use crate::directory::DirectoryShared;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct ServerListener;

impl ServerListener {

    // Hands every accepted connection to its own ClientHandler, runs until dropped
    pub async fn accept_loop(listener: TcpListener, directory: DirectoryShared) {
        loop {
            match listener.accept().await {
                Ok((tcp_socket, addr)) => {
                    info!("Server received new client connection {:?}", &addr);
                    ClientHandler::spawn(tcp_socket, addr, directory.clone());
                }
                Err(e) => {
                    // e.g. out of file descriptors, give the system a moment
                    error!("Unable to accept client connection: {}", e);
                    time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}
