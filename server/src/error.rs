use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised by the chat server core.
///
/// Only `InvalidAddress` and `Bind` are fatal to the process; everything else
/// is scoped to the connection that caused it.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("malformed message: {0}")]
    Protocol(#[from] io::Error),

    #[error("username {0} is already registered")]
    AlreadyRegistered(String),

    #[error("a user is already registered from ip {0}")]
    DuplicateIp(String),

    #[error("recipient {0} not found")]
    RecipientNotFound(String),

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("unknown operation {0:#04x}")]
    UnknownOperation(u8),

    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("invalid bind address {0}")]
    InvalidAddress(String),

    #[error("unable to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
