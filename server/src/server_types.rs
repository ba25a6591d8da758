use tokio::sync::mpsc::Sender;

use protocol::Response;

// server type definitions

// per connection outbound queue, drained by that connection's writer task
pub type Outbound = Sender<Response>;

pub const OUTBOUND_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRegistration,
    Active,
    Closed,
}

pub const USER_REGISTERED: &str = "User registered successfully";
pub const USER_UNREGISTERED: &str = "User unregistered successfully";
pub const USERNAME_TAKEN: &str = "Username already taken";
pub const IP_TAKEN: &str = "A user is already registered from this IP";
pub const NOT_REGISTERED: &str = "User is not registered";
pub const EMPTY_USERNAME: &str = "Username must not be empty";
pub const ALREADY_REGISTERED: &str = "User already registered";
pub const FOREIGN_UNREGISTER: &str = "Cannot unregister another user";
pub const MESSAGE_SENT: &str = "Message sent successfully.";
pub const RECIPIENT_NOT_FOUND: &str = "Recipient not found";
pub const USER_NOT_FOUND: &str = "User not found";
pub const STATUS_UPDATED: &str = "Status updated successfully";
pub const UNKNOWN_OPERATION: &str = "Unknown operation";
