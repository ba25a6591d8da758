use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use tracing::Level;

use crate::error::{ChatError, ChatResult};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WAIT_TIME: u32 = 20;
pub const DEFAULT_TICK_MS: u64 = 1000;

/// Chat relay server
#[derive(Parser, Debug, Clone)]
#[command(name = "server", version, about = "Chat relay server")]
pub struct ServerConfig {
    /// IP address to bind to, e.g. 127.0.0.1
    pub address: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Idle ticks before a user is marked offline
    #[arg(long, default_value_t = DEFAULT_WAIT_TIME, value_parser = clap::value_parser!(u32).range(1..))]
    pub wait_time: u32,

    /// Presence monitor tick interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_TICK_MS, value_parser = clap::value_parser!(u64).range(1..))]
    pub tick_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> ChatResult<SocketAddr> {
        let ip: IpAddr = self.address.parse()
            .map_err(|_| ChatError::InvalidAddress(self.address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn log_level(&self) -> Level {
        if self.verbose { Level::DEBUG } else { Level::INFO }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: "127.0.0.1".to_owned(),
            port: DEFAULT_PORT,
            wait_time: DEFAULT_WAIT_TIME,
            tick_ms: DEFAULT_TICK_MS,
            verbose: false,
        }
    }
}
