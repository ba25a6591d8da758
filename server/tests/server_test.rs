//! End to end tests: a real server on an ephemeral port, clients connecting
//! from distinct loopback addresses so the one-session-per-ip rule holds.

use std::net::SocketAddr;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use protocol::{ChatCodec, ChatMsg, MessageKind, Operation, Payload, Request, Response, StatusCode,
               UserEntry, UserListKind, UserStatus};
use server::directory::DirectoryShared;
use server::server_types::{IP_TAKEN, RECIPIENT_NOT_FOUND, STATUS_UPDATED, UNKNOWN_OPERATION, USER_REGISTERED};
use server::{ChatError, ChatServer, ServerConfig};

type Client = Framed<TcpStream, ChatCodec>;

struct TestServer {
    addr: SocketAddr,
    directory: DirectoryShared,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn start(wait_time: u32, tick_ms: u64) -> Self {
        let config = ServerConfig { port: 0, wait_time, tick_ms, ..ServerConfig::default() };
        let server = ChatServer::new(config);
        let listener = server.bind().await.expect("bind test server");
        let addr = listener.local_addr().unwrap();
        let directory = server.directory().clone();

        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async move {
            let _ = rx.await;
        }));

        TestServer { addr, directory, shutdown, handle }
    }

    async fn connect_from(&self, ip: &str) -> Client {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind(format!("{}:0", ip).parse().unwrap()).unwrap();
        let stream = socket.connect(self.addr).await.expect("connect to test server");
        Framed::new(stream, ChatCodec::new())
    }

    async fn register(&self, ip: &str, name: &str) -> Client {
        let mut client = self.connect_from(ip).await;
        client.send(Request::RegisterUser { username: name.into() }).await.unwrap();
        let response = recv(&mut client).await;
        assert!(response.is_ok(), "registration of {} failed: {:?}", name, response);
        assert_eq!(response.message, USER_REGISTERED);
        client
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap();
    }
}

async fn recv(client: &mut Client) -> Response {
    match timeout(Duration::from_secs(2), client.next()).await {
        Ok(Some(Ok(ChatMsg::Server(response)))) => response,
        other => panic!("expected a response, got {:?}", other),
    }
}

async fn assert_silent(client: &mut Client) {
    if let Ok(msg) = timeout(Duration::from_millis(150), client.next()).await {
        panic!("expected no traffic, got {:?}", msg);
    }
}

async fn wait_for_len(directory: &DirectoryShared, len: usize) {
    for _ in 0..200 {
        if directory.len().await == len {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("directory never reached {} users", len);
}

#[tokio::test]
async fn broadcast_reaches_other_users() {
    let server = TestServer::start(20, 1000).await;
    let mut alice = server.register("127.0.0.2", "alice").await;
    let mut bob = server.register("127.0.0.3", "bob").await;

    alice.send(Request::SendMessage { content: "hi".into(), recipient: None }).await.unwrap();

    let expected = Some(Payload::IncomingMessage {
        content: "hi".into(),
        sender: "alice".into(),
        kind: MessageKind::Broadcast,
    });
    assert_eq!(recv(&mut bob).await.payload, expected);
    assert_eq!(recv(&mut alice).await.payload, expected);

    server.stop().await;
}

#[tokio::test]
async fn direct_message_to_missing_recipient() {
    let server = TestServer::start(20, 1000).await;
    let mut alice = server.register("127.0.0.2", "alice").await;
    let mut bob = server.register("127.0.0.3", "bob").await;

    alice.send(Request::SendMessage { content: "hello".into(), recipient: Some("carol".into()) }).await.unwrap();

    let response = recv(&mut alice).await;
    assert_eq!(response.status_code, StatusCode::InternalServerError);
    assert_eq!(response.message, RECIPIENT_NOT_FOUND);
    assert_silent(&mut bob).await;

    // a real recipient gets it, the sender gets a confirmation
    alice.send(Request::SendMessage { content: "hello".into(), recipient: Some("bob".into()) }).await.unwrap();
    assert_eq!(recv(&mut bob).await.payload, Some(Payload::IncomingMessage {
        content: "hello".into(),
        sender: "alice".into(),
        kind: MessageKind::Direct,
    }));
    let confirm = recv(&mut alice).await;
    assert_eq!((confirm.operation, confirm.status_code), (Operation::SendMessage, StatusCode::Ok));

    server.stop().await;
}

#[tokio::test]
async fn user_listing_shows_everyone_online() {
    let server = TestServer::start(20, 1000).await;
    let mut alice = server.register("127.0.0.2", "alice").await;
    let _bob = server.register("127.0.0.3", "bob").await;

    alice.send(Request::GetUsers { username: None }).await.unwrap();
    let response = recv(&mut alice).await;
    assert_eq!(response.payload, Some(Payload::UserList {
        kind: UserListKind::All,
        users: vec![
            UserEntry { username: "alice".into(), status: UserStatus::Online, ip: None },
            UserEntry { username: "bob".into(), status: UserStatus::Online, ip: None },
        ],
    }));

    alice.send(Request::GetUsers { username: Some("bob".into()) }).await.unwrap();
    match recv(&mut alice).await.payload {
        Some(Payload::UserList { kind: UserListKind::Single, users }) => {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].ip.as_deref(), Some("127.0.0.3"));
        }
        other => panic!("expected single user list, got {:?}", other),
    }

    server.stop().await;
}

#[tokio::test]
async fn second_session_from_same_ip_is_rejected() {
    let server = TestServer::start(20, 1000).await;
    let _dave = server.register("127.0.0.5", "dave").await;

    let mut eve = server.connect_from("127.0.0.5").await;
    eve.send(Request::RegisterUser { username: "eve".into() }).await.unwrap();

    let response = recv(&mut eve).await;
    assert_eq!(response.status_code, StatusCode::InternalServerError);
    assert_eq!(response.message, IP_TAKEN);

    // server hangs up on the rejected session
    let closed = timeout(Duration::from_secs(2), eve.next()).await.unwrap();
    assert!(closed.is_none());

    assert!(server.directory.lookup("eve").await.is_none());
    assert_eq!(server.directory.len().await, 1);

    server.stop().await;
}

#[tokio::test]
async fn unregister_then_disconnect_removes_once() {
    let server = TestServer::start(20, 1000).await;
    let mut alice = server.register("127.0.0.2", "alice").await;
    let _bob = server.register("127.0.0.3", "bob").await;

    alice.send(Request::UnregisterUser { username: "alice".into() }).await.unwrap();
    let response = recv(&mut alice).await;
    assert_eq!((response.operation, response.status_code), (Operation::UnregisterUser, StatusCode::Ok));

    assert!(timeout(Duration::from_secs(2), alice.next()).await.unwrap().is_none());
    drop(alice);

    wait_for_len(&server.directory, 1).await;
    assert!(server.directory.lookup("bob").await.is_some());

    // the name and address are free again
    let _alice = server.register("127.0.0.2", "alice").await;
    wait_for_len(&server.directory, 2).await;

    server.stop().await;
}

#[tokio::test]
async fn disconnect_cleans_up_directory() {
    let server = TestServer::start(20, 1000).await;
    let alice = server.register("127.0.0.2", "alice").await;
    wait_for_len(&server.directory, 1).await;

    drop(alice);
    wait_for_len(&server.directory, 0).await;

    server.stop().await;
}

#[tokio::test]
async fn unknown_operation_keeps_connection_open() {
    let server = TestServer::start(20, 1000).await;
    let mut alice = server.register("127.0.0.2", "alice").await;

    alice.send(Request::Unknown(b'?')).await.unwrap();
    let response = recv(&mut alice).await;
    assert_eq!(response.status_code, StatusCode::BadRequest);
    assert_eq!(response.message, UNKNOWN_OPERATION);

    alice.send(Request::UpdateStatus { status: UserStatus::Busy }).await.unwrap();
    assert!(recv(&mut alice).await.is_ok());
    assert_eq!(server.directory.lookup("alice").await.unwrap().status, UserStatus::Busy);

    server.stop().await;
}

#[tokio::test]
async fn idle_user_goes_offline_until_next_message() {
    let server = TestServer::start(5, 20).await;
    let mut alice = server.register("127.0.0.2", "alice").await;

    let mut offline = false;
    for _ in 0..100 {
        sleep(Duration::from_millis(20)).await;
        if server.directory.lookup("alice").await.unwrap().status == UserStatus::Offline {
            offline = true;
            break;
        }
    }
    assert!(offline);

    let notice = recv(&mut alice).await;
    assert_eq!((notice.operation, notice.status_code), (Operation::UpdateStatus, StatusCode::Ok));
    assert_eq!(notice.message, STATUS_UPDATED);

    alice.send(Request::SendMessage { content: "back".into(), recipient: None }).await.unwrap();
    let echo = recv(&mut alice).await;
    assert_eq!(echo.operation, Operation::IncomingMessage);

    // the reset happens before the broadcast is routed
    let info = server.directory.lookup("alice").await.unwrap();
    assert_eq!(info.status, UserStatus::Online);
    assert!(info.idle < 5);

    server.stop().await;
}

#[tokio::test]
async fn bind_failures_are_reported() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let server = ChatServer::new(ServerConfig { port, ..ServerConfig::default() });
    assert!(matches!(server.bind().await, Err(ChatError::Bind { .. })));

    let server = ChatServer::new(ServerConfig { address: "not-an-ip".into(), ..ServerConfig::default() });
    assert!(matches!(server.bind().await, Err(ChatError::InvalidAddress(_))));
}
