//! Per-socket session entries

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::protocol::{ActingAs, Outbound};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one live socket, assigned at accept time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate a process-unique id
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Write side of a session
///
/// The registry holds the only sender. Dropping it (by removing the client)
/// lets the session writer drain what is queued and then close the socket.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a frame; false when the session writer is already gone
    pub fn send(&self, message: Outbound) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Last STATUS report of a client for one connection name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub acting_as: ActingAs,
    pub active: bool,
    pub connected: u32,
}

#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub handle: ClientHandle,
    pub remote: Option<SocketAddr>,
    /// Identity hash, set by registration
    pub identity: Option<String>,
    pub key: Option<String>,
    pub hostname: String,
    pub version: String,
    /// Daemon this socket speaks for, once bound
    pub daemon_id: Option<String>,
    pub internal_addresses: Vec<String>,
    pub connections: HashMap<String, ConnectionStatus>,
}

impl Client {
    pub fn new(id: ClientId, handle: ClientHandle, remote: Option<SocketAddr>) -> Self {
        Self {
            id,
            handle,
            remote,
            identity: None,
            key: None,
            hostname: String::new(),
            version: String::new(),
            daemon_id: None,
            internal_addresses: Vec::new(),
            connections: HashMap::new(),
        }
    }

    /// Replace the internal address set, keeping first-seen order
    pub fn set_internal_addresses(&mut self, addresses: &[String]) {
        self.internal_addresses.clear();
        for address in addresses {
            if !self.internal_addresses.contains(address) {
                self.internal_addresses.push(address.clone());
            }
        }
    }
}

/// Registry aggregate for one daemon and every socket representing it
#[derive(Debug, Clone)]
pub struct Daemon {
    pub id: String,
    pub name: String,
    pub user_id: String,
    /// Denormalized for display
    pub user_email: String,
    pub clients: Vec<ClientId>,
}

impl Daemon {
    /// `<owner email>?<daemon name>`
    pub fn descriptor(&self) -> String {
        format!("{}?{}", self.user_email, self.name)
    }
}
