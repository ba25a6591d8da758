use std::future::Future;

use tokio::net::TcpListener;
use tokio::select;
use tracing::info;

use crate::config::ServerConfig;
use crate::directory::DirectoryShared;
use crate::error::{ChatError, ChatResult};
use crate::presence::PresenceMonitor;
use crate::server_listener::ServerListener;

/// Owns the directory for the lifetime of the process and ties the
/// presence monitor to the accept loop.
pub struct ChatServer {
    config: ServerConfig,
    directory: DirectoryShared,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        ChatServer {
            config,
            directory: DirectoryShared::new(),
        }
    }

    pub fn directory(&self) -> &DirectoryShared {
        &self.directory
    }

    pub async fn bind(&self) -> ChatResult<TcpListener> {
        let addr = self.config.socket_addr()?;
        TcpListener::bind(addr).await
            .map_err(|source| ChatError::Bind { addr, source })
    }

    /// Accept clients on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let monitor = PresenceMonitor::new(&self.directory, self.config.tick_interval(),
                                           self.config.wait_time).spawn();

        select! {
            _ = ServerListener::accept_loop(listener, self.directory.clone()) => {}
            _ = shutdown => info!("Server shutting down"),
        }

        monitor.stop().await;
    }
}
