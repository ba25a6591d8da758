use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use protocol::{MessageKind, Operation, Response, StatusCode};

use crate::directory::DirectoryShared;
use crate::error::{ChatError, ChatResult};
use crate::server_types::{Outbound, MESSAGE_SENT, RECIPIENT_NOT_FOUND};

// handles msg delivery back to clients, every send is a non blocking
// push onto the recipient's outbound queue made while the directory is locked
pub struct Delivery {
    directory: DirectoryShared,
}

impl Delivery {
    pub fn new(directory: &DirectoryShared) -> Self {
        Delivery {
            directory: directory.clone(),
        }
    }

    /// Fan `content` out to every registered user, sender included.
    /// Returns how many recipients accepted the message.
    pub async fn broadcast(&self, sender: &str, content: &str) -> usize {
        let d = self.directory.lock().await;
        let mut delivered = 0;

        for (name, handle) in d.handles() {
            let response = Response::incoming(content, sender, MessageKind::Broadcast);
            if push(name, handle, response) {
                delivered += 1;
            }
        }

        debug!("Broadcast from {} delivered to {}/{} users", sender, delivered, d.len());
        delivered
    }

    /// Deliver `content` to `recipient` only and confirm to the sender on `reply`.
    /// An unknown recipient gets the sender an error response instead.
    pub async fn direct(&self, sender: &str, recipient: &str, content: &str, reply: &Outbound) -> ChatResult<()> {
        // lookup and both sends under one guard so the recipient can't vanish mid delivery
        let d = self.directory.lock().await;

        match d.handle(recipient) {
            Some(handle) => {
                push(recipient, handle, Response::incoming(content, sender, MessageKind::Direct));
                push(sender, reply, Response::ok(Operation::SendMessage, MESSAGE_SENT));
                Ok(())
            }
            None => {
                let response = Response::error(Operation::IncomingMessage,
                                               StatusCode::InternalServerError, RECIPIENT_NOT_FOUND);
                push(sender, reply, response);
                Err(ChatError::RecipientNotFound(recipient.to_owned()))
            }
        }
    }
}

// single best effort send, failures are logged and skipped
pub(crate) fn push(name: &str, handle: &Outbound, response: Response) -> bool {
    match handle.try_send(response) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("Outbound queue full for {}, dropping message", name);
            false
        }
        Err(TrySendError::Closed(_)) => {
            warn!("Connection for {} already closed, dropping message", name);
            false
        }
    }
}
