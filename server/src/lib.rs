pub mod config;
pub mod error;
pub mod server_types;

// shared state
pub mod directory;
pub mod delivery;

// per connection
pub mod client_handler;

// background
pub mod presence;

// server
mod server_listener;
pub mod server;

pub use config::ServerConfig;
pub use error::{ChatError, ChatResult};
pub use server::ChatServer;
