use std::io;
use std::net::SocketAddr;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc::{self, Receiver};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use protocol::{ChatCodec, ChatMsg, Operation, Request, Response, StatusCode, UserEntry, UserListKind, UserStatus};

use crate::delivery::Delivery;
use crate::directory::DirectoryShared;
use crate::error::{ChatError, ChatResult};
use crate::server_types::*;

// Handles server communication from client
// Essentially this models a client session on the server side:
// awaiting registration -> active -> closed
pub struct ClientHandler {
    addr: SocketAddr,
    ip: String,
    username: Option<String>, // set once registered
    state: SessionState,
    directory: DirectoryShared,
    delivery: Delivery,
    outbound: Outbound,
}

impl ClientHandler {

    pub fn new(addr: SocketAddr, directory: &DirectoryShared, outbound: Outbound) -> Self {
        Self {
            addr,
            ip: addr.ip().to_string(),
            username: None,
            state: SessionState::AwaitingRegistration,
            directory: directory.clone(),
            delivery: Delivery::new(directory),
            outbound,
        }
    }

    // Spawn tokio tasks to handle socket reads and writes for one client
    pub fn spawn(socket: TcpStream, addr: SocketAddr, directory: DirectoryShared) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (tcp_read, tcp_write) = socket.into_split();
            let (outbound, outbound_rx) = mpsc::channel::<Response>(OUTBOUND_CHANNEL_SIZE);

            let writer = spawn_writer(tcp_write, outbound_rx, addr);
            let mut fr = FramedRead::new(tcp_read, ChatCodec::new());

            ClientHandler::new(addr, &directory, outbound).run(&mut fr).await;

            // handler is gone along with its outbound handle, let the writer drain
            let _ = writer.await;
            info!("Connection {} closed", addr);
        })
    }

    /// Drive the session until the peer leaves, unregisters or misbehaves,
    /// then remove whatever the session left in the directory.
    pub async fn run<S>(mut self, frames: &mut S)
    where
        S: Stream<Item = io::Result<ChatMsg>> + Unpin,
    {
        while self.state != SessionState::Closed {
            let next = match frames.next().await {
                Some(Ok(msg)) => Ok(msg),
                Some(Err(e)) => Err(ChatError::Protocol(e)),
                None => Err(ChatError::PeerDisconnected),
            };

            let served = match next {
                Ok(ChatMsg::Client(request)) => self.dispatch(request).await,
                // clients have no business sending responses
                Ok(ChatMsg::Server(response)) => self.unknown(response.operation).await,
                Err(ChatError::PeerDisconnected) => {
                    debug!("Remote {} has closed connection", self.addr);
                    self.state = SessionState::Closed;
                    Ok(())
                }
                Err(e) => {
                    warn!("Closing connection {}: {}", self.addr, e);
                    self.state = SessionState::Closed;
                    Ok(())
                }
            };

            // the client already has its error response, the session carries on
            if let Err(e) = served {
                debug!("Request from {} not served: {}", self.addr, e);
            }
        }

        self.cleanup().await;
    }

    async fn dispatch(&mut self, request: Request) -> ChatResult<()> {
        debug!("server received from {}: {:?}", self.addr, request);

        match self.state {
            SessionState::AwaitingRegistration => match request {
                Request::RegisterUser { username } => self.register(username).await,
                Request::Unknown(tag) => return self.unknown(Operation::Unknown(tag)).await,
                other => {
                    self.reply(Response::error(other.operation(), StatusCode::BadRequest, NOT_REGISTERED)).await;
                }
            },
            SessionState::Active => match request {
                Request::RegisterUser { .. } => {
                    self.reply(Response::error(Operation::RegisterUser, StatusCode::BadRequest, ALREADY_REGISTERED)).await;
                }
                Request::UnregisterUser { username } => self.unregister(username).await,
                Request::SendMessage { content, recipient } => return self.send_message(content, recipient).await,
                Request::GetUsers { username } => return self.get_users(username).await,
                Request::UpdateStatus { status } => self.update_status(status).await,
                Request::Unknown(tag) => return self.unknown(Operation::Unknown(tag)).await,
            },
            SessionState::Closed => {}
        }

        Ok(())
    }

    async fn register(&mut self, username: String) {
        if username.is_empty() {
            self.reply(Response::error(Operation::RegisterUser, StatusCode::BadRequest, EMPTY_USERNAME)).await;
            return;
        }

        // hold a slot on our own queue before locking, then push the ack under the
        // same guard as the insert so no routed message can overtake it
        let permit = match self.outbound.reserve().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Writer for {} is gone, abandoning registration", self.addr);
                self.state = SessionState::Closed;
                return;
            }
        };

        let result = {
            let mut d = self.directory.lock().await;
            let result = d.register(&username, &self.ip, self.outbound.clone());
            if result.is_ok() {
                permit.send(Response::ok(Operation::RegisterUser, USER_REGISTERED));
            }
            result
        };

        match result {
            Ok(()) => {
                info!("User {} joined from {}", &username, self.addr);
                self.username = Some(username);
                self.state = SessionState::Active;
            }
            Err(e) => {
                warn!("Registration from {} rejected: {}", self.addr, e);
                let message = match e {
                    ChatError::DuplicateIp(_) => IP_TAKEN,
                    _ => USERNAME_TAKEN,
                };
                self.reply(Response::error(Operation::RegisterUser, StatusCode::InternalServerError, message)).await;
                self.state = SessionState::Closed;
            }
        }
    }

    async fn unregister(&mut self, username: String) {
        if username != self.name() {
            self.reply(Response::error(Operation::UnregisterUser, StatusCode::BadRequest, FOREIGN_UNREGISTER)).await;
            return;
        }

        // the session gives up its name here, cleanup has nothing left to remove
        self.username = None;
        self.directory.unregister_owned(&username, &self.outbound).await;
        info!("User {} unregistered", &username);

        self.reply(Response::ok(Operation::UnregisterUser, USER_UNREGISTERED)).await;
        self.state = SessionState::Closed;
    }

    async fn send_message(&mut self, content: String, recipient: Option<String>) -> ChatResult<()> {
        let sender = self.name().to_owned();
        self.directory.touch(&sender).await;

        match recipient {
            None => {
                debug!("Broadcast from {}: {}", &sender, &content);
                self.delivery.broadcast(&sender, &content).await;
                Ok(())
            }
            Some(recipient) => {
                debug!("Direct message from {} to {}", &sender, &recipient);
                self.delivery.direct(&sender, &recipient, &content, &self.outbound).await
            }
        }
    }

    async fn get_users(&mut self, filter: Option<String>) -> ChatResult<()> {
        let name = match filter {
            None => {
                let users = self.directory.snapshot().await;
                self.reply(Response::user_list(UserListKind::All, users)).await;
                return Ok(());
            }
            Some(name) => name,
        };

        match self.directory.find(&name).await {
            Ok(info) => {
                let entry = UserEntry { username: info.username, status: info.status, ip: Some(info.ip) };
                self.reply(Response::user_list(UserListKind::Single, vec![entry])).await;
                Ok(())
            }
            Err(e) => {
                self.reply(Response::error(Operation::GetUsers, StatusCode::InternalServerError, USER_NOT_FOUND)).await;
                Err(e)
            }
        }
    }

    async fn update_status(&mut self, status: UserStatus) {
        let name = self.name().to_owned();
        self.directory.set_status(&name, status).await;
        debug!("User {} set status {}", &name, status);

        self.reply(Response::ok(Operation::UpdateStatus, STATUS_UPDATED)).await;
    }

    async fn unknown(&mut self, operation: Operation) -> ChatResult<()> {
        self.reply(Response::error(operation, StatusCode::BadRequest, UNKNOWN_OPERATION)).await;

        match operation {
            Operation::Unknown(tag) => Err(ChatError::UnknownOperation(tag)),
            other => {
                warn!("Unexpected {:?} from {}", other, self.addr);
                Ok(())
            }
        }
    }

    // process client disconnection, only removes the entry this session registered
    async fn cleanup(&mut self) {
        if let Some(name) = self.username.take() {
            if self.directory.unregister_owned(&name, &self.outbound).await {
                info!("User {} has left", name);
            }
        }
    }

    fn name(&self) -> &str {
        self.username.as_deref().unwrap_or_default()
    }

    // waits for room on our own outbound queue, only this connection stalls
    async fn reply(&self, response: Response) {
        if self.outbound.send(response).await.is_err() {
            warn!("Unable to queue response for {}, writer is gone", self.addr);
        }
    }
}

// Owns the socket write half, drains the outbound queue until every handle is dropped
fn spawn_writer(tcp_write: OwnedWriteHalf, mut outbound_rx: Receiver<Response>, addr: SocketAddr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut fw = FramedWrite::new(tcp_write, ChatCodec::new());

        while let Some(response) = outbound_rx.recv().await {
            if let Err(e) = fw.send(response).await {
                warn!("Unable to write to {}: {}", addr, e);
                break;
            }
        }

        // shut down our half so the peer sees end of stream
        if let Err(e) = SinkExt::<Response>::close(&mut fw).await {
            debug!("Error closing writer for {}: {}", addr, e);
        }
    })
}
