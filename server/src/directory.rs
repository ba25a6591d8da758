//! Shared directory of registered users.
//!
//! Every facet of a user (outbound handle, ip, presence status, idle counter)
//! lives in one `Directory` behind one mutex, so each operation below is a
//! single critical section and no caller can see a half registered user.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use protocol::{UserEntry, UserStatus};

use crate::error::{ChatError, ChatResult};
use crate::server_types::Outbound;

pub struct DirectoryShared {
    directory: Arc<Mutex<Directory>>,
}

struct User {
    handle: Outbound,
    ip: String,
    status: UserStatus,
    idle: u32,
}

/// Point in time copy of a directory entry, without the connection handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub ip: String,
    pub status: UserStatus,
    pub idle: u32,
}

pub struct Directory {
    users: BTreeMap<String, User>,
    ips: HashMap<String, String>, // ip -> username
}

impl DirectoryShared {
    pub fn new() -> Self {
        DirectoryShared {
            directory: Arc::new(Mutex::new(Directory::new())),
        }
    }

    pub async fn register(&self, username: &str, ip: &str, handle: Outbound) -> ChatResult<()> {
        self.lock().await.register(username, ip, handle)
    }

    pub async fn unregister_owned(&self, username: &str, handle: &Outbound) -> bool {
        self.lock().await.unregister_owned(username, handle)
    }

    pub async fn lookup(&self, username: &str) -> Option<UserInfo> {
        self.lock().await.lookup(username)
    }

    pub async fn find(&self, username: &str) -> ChatResult<UserInfo> {
        self.lock().await.find(username)
    }

    pub async fn set_status(&self, username: &str, status: UserStatus) -> bool {
        self.lock().await.set_status(username, status)
    }

    pub async fn touch(&self, username: &str) -> bool {
        self.lock().await.touch(username)
    }

    pub async fn tick(&self, wait_time: u32) -> Vec<String> {
        self.lock().await.tick(wait_time)
    }

    pub async fn snapshot(&self) -> Vec<UserEntry> {
        self.lock().await.snapshot()
    }

    pub async fn len(&self) -> usize {
        self.lock().await.len()
    }
}

impl Clone for DirectoryShared {
    fn clone(&self) -> Self {
        DirectoryShared {
            directory: Arc::clone(&self.directory),
        }
    }
}

impl Default for DirectoryShared {
    fn default() -> Self {
        Self::new()
    }
}

// bring in auto deref functionality so callers needing several
// steps under one guard can lock the directory themselves
impl Deref for DirectoryShared {
    type Target = Arc<Mutex<Directory>>;

    fn deref(&self) -> &Self::Target {
        &self.directory
    }
}

impl Directory {
    pub fn new() -> Self {
        Directory {
            users: BTreeMap::new(),
            ips: HashMap::new(),
        }
    }

    /// Insert a new user as online with a zero idle counter.
    /// Name and ip uniqueness are checked together with the insert.
    pub fn register(&mut self, username: &str, ip: &str, handle: Outbound) -> ChatResult<()> {
        if self.users.contains_key(username) {
            return Err(ChatError::AlreadyRegistered(username.to_owned()));
        }

        if self.ips.contains_key(ip) {
            return Err(ChatError::DuplicateIp(ip.to_owned()));
        }

        self.ips.insert(ip.to_owned(), username.to_owned());
        self.users.insert(username.to_owned(), User {
            handle,
            ip: ip.to_owned(),
            status: UserStatus::Online,
            idle: 0,
        });

        info!("User {} registered from {}", username, ip);
        Ok(())
    }

    // Removing an absent user is not an error, returns whether anything was removed
    pub fn unregister(&mut self, username: &str) -> bool {
        match self.users.remove(username) {
            Some(user) => {
                self.ips.remove(&user.ip);
                info!("User {} removed from directory", username);
                true
            }
            None => false,
        }
    }

    /// Remove `username` only while it is still registered to `handle`, so a
    /// finished session can't evict a newer session that reused the name.
    pub fn unregister_owned(&mut self, username: &str, handle: &Outbound) -> bool {
        match self.users.get(username) {
            Some(user) if user.handle.same_channel(handle) => self.unregister(username),
            _ => false,
        }
    }

    pub fn lookup(&self, username: &str) -> Option<UserInfo> {
        self.users.get(username).map(|user| UserInfo {
            username: username.to_owned(),
            ip: user.ip.clone(),
            status: user.status,
            idle: user.idle,
        })
    }

    pub fn find(&self, username: &str) -> ChatResult<UserInfo> {
        self.lookup(username)
            .ok_or_else(|| ChatError::UserNotFound(username.to_owned()))
    }

    pub fn set_status(&mut self, username: &str, status: UserStatus) -> bool {
        match self.users.get_mut(username) {
            Some(user) => {
                user.status = status;
                true
            }
            None => false,
        }
    }

    /// Record traffic from a user: idle counter back to zero and online again.
    pub fn touch(&mut self, username: &str) -> bool {
        match self.users.get_mut(username) {
            Some(user) => {
                user.idle = 0;
                user.status = UserStatus::Online;
                true
            }
            None => false,
        }
    }

    /// Age every idle counter by one tick. A user whose counter reaches
    /// `wait_time` on this tick goes offline, returns the names flipped.
    pub fn tick(&mut self, wait_time: u32) -> Vec<String> {
        let mut flipped = vec![];

        for (name, user) in self.users.iter_mut() {
            user.idle = user.idle.saturating_add(1);

            if user.idle == wait_time {
                debug!("User {} idle for {} ticks", name, wait_time);
                user.status = UserStatus::Offline;
                flipped.push(name.clone());
            }
        }

        flipped
    }

    // ordered by username
    pub fn snapshot(&self) -> Vec<UserEntry> {
        self.users.iter()
            .map(|(name, user)| UserEntry {
                username: name.clone(),
                status: user.status,
                ip: None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    // handles are only lent out for the lifetime of the guard
    pub(crate) fn handle(&self, username: &str) -> Option<&Outbound> {
        self.users.get(username).map(|user| &user.handle)
    }

    pub(crate) fn handles(&self) -> impl Iterator<Item = (&str, &Outbound)> {
        self.users.iter().map(|(name, user)| (name.as_str(), &user.handle))
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}
