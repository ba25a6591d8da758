//! Wire types and codec shared by the chat server and its clients.
//!
//! Every message travels as one length-delimited frame (4 byte big-endian
//! length, then the body), so message boundaries survive however the byte
//! stream happens to be split by the transport.

use std::fmt;
use std::io::{Error, ErrorKind};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

// encode and decode bypasses traditional libraries
// like serde or message pack, frame bodies are tag bytes
// followed by u16 length prefixed strings

pub const MAX_FRAME_LEN: usize = 64 * 1024;

const REQ: u8 = b'+';
const RESP: u8 = b'-';

const OP_REGISTER: u8 = b'&';
const OP_UNREGISTER: u8 = b'$';
const OP_SEND: u8 = b'#';
const OP_USERS: u8 = b':';
const OP_STATUS: u8 = b'%';
const OP_INCOMING: u8 = b'*';

const PAYLOAD_NONE: u8 = 0;
const PAYLOAD_INCOMING: u8 = 1;
const PAYLOAD_USERS: u8 = 2;

#[derive(Debug)]
pub enum ChatMsg {
    Client(Request),
    Server(Response),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RegisterUser,    // b'&'
    UnregisterUser,  // b'$'
    SendMessage,     // b'#'
    GetUsers,        // b':'
    UpdateStatus,    // b'%'
    IncomingMessage, // b'*'
    Unknown(u8),
}

impl Operation {
    fn tag(self) -> u8 {
        match self {
            Operation::RegisterUser => OP_REGISTER,
            Operation::UnregisterUser => OP_UNREGISTER,
            Operation::SendMessage => OP_SEND,
            Operation::GetUsers => OP_USERS,
            Operation::UpdateStatus => OP_STATUS,
            Operation::IncomingMessage => OP_INCOMING,
            Operation::Unknown(tag) => tag,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            OP_REGISTER => Operation::RegisterUser,
            OP_UNREGISTER => Operation::UnregisterUser,
            OP_SEND => Operation::SendMessage,
            OP_USERS => Operation::GetUsers,
            OP_STATUS => Operation::UpdateStatus,
            OP_INCOMING => Operation::IncomingMessage,
            other => Operation::Unknown(other),
        }
    }
}

/// Presence status of a registered user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserStatus {
    Online,
    Busy,
    Offline,
}

impl UserStatus {
    fn to_byte(self) -> u8 {
        match self {
            UserStatus::Online => 0,
            UserStatus::Busy => 1,
            UserStatus::Offline => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self, Error> {
        match b {
            0 => Ok(UserStatus::Online),
            1 => Ok(UserStatus::Busy),
            2 => Ok(UserStatus::Offline),
            other => Err(invalid(format!("Unknown user status {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Busy => "busy",
            UserStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    InternalServerError,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::InternalServerError => 500,
        }
    }

    fn from_code(code: u16) -> Result<Self, Error> {
        match code {
            200 => Ok(StatusCode::Ok),
            400 => Ok(StatusCode::BadRequest),
            500 => Ok(StatusCode::InternalServerError),
            other => Err(invalid(format!("Unknown status code {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Broadcast,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserListKind {
    Single,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub username: String,
    pub status: UserStatus,
    pub ip: Option<String>, // only filled in for single user lookups
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RegisterUser { username: String },
    UnregisterUser { username: String },
    SendMessage { content: String, recipient: Option<String> }, // no recipient means broadcast
    GetUsers { username: Option<String> },
    UpdateStatus { status: UserStatus },
    Unknown(u8), // well framed but unrecognized operation tag
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::RegisterUser { .. } => Operation::RegisterUser,
            Request::UnregisterUser { .. } => Operation::UnregisterUser,
            Request::SendMessage { .. } => Operation::SendMessage,
            Request::GetUsers { .. } => Operation::GetUsers,
            Request::UpdateStatus { .. } => Operation::UpdateStatus,
            Request::Unknown(tag) => Operation::Unknown(*tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    IncomingMessage {
        content: String,
        sender: String,
        kind: MessageKind,
    },
    UserList {
        kind: UserListKind,
        users: Vec<UserEntry>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub operation: Operation,
    pub status_code: StatusCode,
    pub message: String,
    pub payload: Option<Payload>,
}

impl Response {
    pub fn ok(operation: Operation, message: impl Into<String>) -> Self {
        Response {
            operation,
            status_code: StatusCode::Ok,
            message: message.into(),
            payload: None,
        }
    }

    pub fn error(operation: Operation, status_code: StatusCode, message: impl Into<String>) -> Self {
        Response {
            operation,
            status_code,
            message: message.into(),
            payload: None,
        }
    }

    /// A message routed to a recipient on behalf of `sender`.
    pub fn incoming(content: impl Into<String>, sender: impl Into<String>, kind: MessageKind) -> Self {
        Response {
            operation: Operation::IncomingMessage,
            status_code: StatusCode::Ok,
            message: String::new(),
            payload: Some(Payload::IncomingMessage {
                content: content.into(),
                sender: sender.into(),
                kind,
            }),
        }
    }

    pub fn user_list(kind: UserListKind, users: Vec<UserEntry>) -> Self {
        Response {
            operation: Operation::GetUsers,
            status_code: StatusCode::Ok,
            message: String::new(),
            payload: Some(Payload::UserList { kind, users }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == StatusCode::Ok
    }
}

/// Frames requests and responses over a byte stream.
pub struct ChatCodec {
    framing: LengthDelimitedCodec,
}

impl ChatCodec {
    pub fn new() -> Self {
        ChatCodec {
            framing: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }

    fn write_frame(&mut self, body: BytesMut, dst: &mut BytesMut) -> Result<(), Error> {
        self.framing.encode(body.freeze(), dst)
    }
}

impl Default for ChatCodec {
    fn default() -> Self {
        Self::new()
    }
}

// convert a complete frame to ChatMsg, partial frames stay buffered
impl Decoder for ChatCodec {
    type Item = ChatMsg;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing.decode(src)? {
            Some(frame) => decode_body(frame).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Request> for ChatCodec {
    type Error = Error;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        body.put_u8(REQ);
        body.put_u8(item.operation().tag());

        match item {
            Request::RegisterUser { username } | Request::UnregisterUser { username } => {
                encode_string(&username, &mut body)?;
            }
            Request::SendMessage { content, recipient } => {
                encode_string(&content, &mut body)?;
                encode_optional(recipient.as_deref(), &mut body)?;
            }
            Request::GetUsers { username } => {
                encode_optional(username.as_deref(), &mut body)?;
            }
            Request::UpdateStatus { status } => {
                body.put_u8(status.to_byte());
            }
            Request::Unknown(_) => {}
        }

        self.write_frame(body, dst)
    }
}

impl Encoder<Response> for ChatCodec {
    type Error = Error;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        body.put_u8(RESP);
        body.put_u8(item.operation.tag());
        body.put_u16(item.status_code.code());
        encode_string(&item.message, &mut body)?;

        match item.payload {
            None => body.put_u8(PAYLOAD_NONE),
            Some(Payload::IncomingMessage { content, sender, kind }) => {
                body.put_u8(PAYLOAD_INCOMING);
                encode_string(&content, &mut body)?;
                encode_string(&sender, &mut body)?;
                body.put_u8(match kind {
                    MessageKind::Broadcast => 0,
                    MessageKind::Direct => 1,
                });
            }
            Some(Payload::UserList { kind, users }) => {
                body.put_u8(PAYLOAD_USERS);
                body.put_u8(match kind {
                    UserListKind::Single => 0,
                    UserListKind::All => 1,
                });
                let count = u16::try_from(users.len())
                    .map_err(|_| Error::new(ErrorKind::InvalidInput, "Too many users in list"))?;
                body.put_u16(count);
                for user in users {
                    encode_string(&user.username, &mut body)?;
                    body.put_u8(user.status.to_byte());
                    encode_optional(user.ip.as_deref(), &mut body)?;
                }
            }
        }

        self.write_frame(body, dst)
    }
}

impl Encoder<ChatMsg> for ChatCodec {
    type Error = Error;

    fn encode(&mut self, item: ChatMsg, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ChatMsg::Client(request) => Encoder::<Request>::encode(self, request, dst),
            ChatMsg::Server(response) => Encoder::<Response>::encode(self, response, dst),
        }
    }
}

fn decode_body(mut src: BytesMut) -> Result<ChatMsg, Error> {
    let direction = get_u8(&mut src)?;
    let tag = get_u8(&mut src)?;

    let msg = match direction {
        REQ => ChatMsg::Client(decode_request(tag, &mut src)?),
        RESP => ChatMsg::Server(decode_response(tag, &mut src)?),
        other => return Err(invalid(format!("Unknown direction byte {:#04x}", other))),
    };

    if src.has_remaining() {
        return Err(invalid("Trailing bytes after message"));
    }

    Ok(msg)
}

fn decode_request(tag: u8, src: &mut BytesMut) -> Result<Request, Error> {
    let request = match tag {
        OP_REGISTER => Request::RegisterUser { username: decode_string(src)? },
        OP_UNREGISTER => Request::UnregisterUser { username: decode_string(src)? },
        OP_SEND => {
            let content = decode_string(src)?;
            let recipient = decode_optional(src)?;
            Request::SendMessage { content, recipient }
        }
        OP_USERS => Request::GetUsers { username: decode_optional(src)? },
        OP_STATUS => Request::UpdateStatus { status: UserStatus::from_byte(get_u8(src)?)? },
        other => {
            // the frame boundary is known, so skip whatever body came along
            src.advance(src.remaining());
            Request::Unknown(other)
        }
    };

    Ok(request)
}

fn decode_response(tag: u8, src: &mut BytesMut) -> Result<Response, Error> {
    let operation = Operation::from_tag(tag);
    let status_code = StatusCode::from_code(get_u16(src)?)?;
    let message = decode_string(src)?;

    let payload = match get_u8(src)? {
        PAYLOAD_NONE => None,
        PAYLOAD_INCOMING => {
            let content = decode_string(src)?;
            let sender = decode_string(src)?;
            let kind = match get_u8(src)? {
                0 => MessageKind::Broadcast,
                1 => MessageKind::Direct,
                other => return Err(invalid(format!("Unknown message kind {}", other))),
            };
            Some(Payload::IncomingMessage { content, sender, kind })
        }
        PAYLOAD_USERS => {
            let kind = match get_u8(src)? {
                0 => UserListKind::Single,
                1 => UserListKind::All,
                other => return Err(invalid(format!("Unknown user list kind {}", other))),
            };
            let count = get_u16(src)? as usize;
            let mut users = Vec::with_capacity(count);
            for _ in 0..count {
                let username = decode_string(src)?;
                let status = UserStatus::from_byte(get_u8(src)?)?;
                let ip = decode_optional(src)?;
                users.push(UserEntry { username, status, ip });
            }
            Some(Payload::UserList { kind, users })
        }
        other => return Err(invalid(format!("Unknown payload tag {}", other))),
    };

    Ok(Response { operation, status_code, message, payload })
}

fn get_u8(src: &mut BytesMut) -> Result<u8, Error> {
    if src.remaining() < 1 {
        return Err(invalid("Truncated message"));
    }
    Ok(src.get_u8())
}

fn get_u16(src: &mut BytesMut) -> Result<u16, Error> {
    if src.remaining() < 2 {
        return Err(invalid("Truncated message"));
    }
    Ok(src.get_u16())
}

// read a u16 length prefixed utf8 string from BytesMut
fn decode_string(src: &mut BytesMut) -> Result<String, Error> {
    let len = get_u16(src)? as usize;
    if src.remaining() < len {
        return Err(invalid("Truncated string"));
    }
    let bytes = src.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| invalid("Invalid utf8"))
}

// empty string on the wire stands for an absent value
fn decode_optional(src: &mut BytesMut) -> Result<Option<String>, Error> {
    let s = decode_string(src)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

// write str into BytesMut
fn encode_string(s: &str, dst: &mut BytesMut) -> Result<(), Error> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "String too long to encode"))?;
    dst.reserve(2 + s.len());
    dst.put_u16(len);
    dst.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_optional(s: Option<&str>, dst: &mut BytesMut) -> Result<(), Error> {
    encode_string(s.unwrap_or_default(), dst)
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, msg.into())
}
