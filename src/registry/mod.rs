//! Authoritative in-memory session state
//!
//! Connected clients, daemon aggregates, identity sets, rendezvous waiting
//! entries and punch pairs all live in one [`Registry`]. It is shared as a
//! [`SharedRegistry`] and every mutation runs inside a single lock guard with
//! no suspension point, so one logical transition (for example a STATUS
//! update, the readiness check and the target drain) is never interleaved
//! with another.
//!
//! Removing a client cascades: its id disappears from its daemon, its
//! identity set, every waiting entry and every pair.

mod client;

pub use client::{Client, ClientHandle, ClientId, ConnectionStatus, Daemon};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::nat::PairTable;
use crate::protocol::Outbound;
use crate::rendezvous::WaitingTable;

/// Registry handle shared by the session tasks, handlers and listeners
pub type SharedRegistry = Arc<Mutex<Registry>>;

#[derive(Debug, Default)]
pub struct Registry {
    pub(crate) clients: HashMap<ClientId, Client>,
    pub(crate) daemons: HashMap<String, Daemon>,
    /// Insertion-ordered so lookups prefer the longest-connected member
    pub(crate) identities: HashMap<String, Vec<ClientId>>,
    pub(crate) waiting: WaitingTable,
    pub(crate) pairs: PairTable,
    /// Bumped on every daemon disconnect
    revocation_clock: u64,
    /// Clock value at each daemon's latest disconnect
    revoked_at: HashMap<String, u64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Register a freshly accepted socket; false if the id is already taken
    pub fn add_client(
        &mut self,
        id: ClientId,
        handle: ClientHandle,
        remote: Option<SocketAddr>,
    ) -> bool {
        if self.clients.contains_key(&id) {
            return false;
        }
        self.clients.insert(id, Client::new(id, handle, remote));
        debug!("Registry: added {}, count={}", id, self.clients.len());
        true
    }

    /// Remove a client and every reference to it. Idempotent.
    pub fn remove_client(&mut self, id: ClientId) -> Option<Client> {
        self.waiting.purge_client(id);
        self.pairs.purge_client(id);

        let client = self.clients.remove(&id)?;

        if let Some(daemon_id) = &client.daemon_id {
            self.unlink_daemon(daemon_id, id);
        }
        if let Some(identity) = &client.identity {
            self.unlink_identity(identity, id);
        }

        debug!("Registry: removed {}, count={}", id, self.clients.len());
        Some(client)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Attach an identity to a registered client
    pub fn set_identity(&mut self, id: ClientId, hash: &str, key: &str) -> bool {
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        let previous = client.identity.replace(hash.to_string());
        client.key = Some(key.to_string());

        if let Some(previous) = previous {
            if previous != hash {
                self.unlink_identity(&previous, id);
            }
        }

        let members = self.identities.entry(hash.to_string()).or_default();
        if !members.contains(&id) {
            members.push(id);
        }
        true
    }

    /// Bind a registered client to a daemon, creating the aggregate on first use
    pub fn bind_daemon(
        &mut self,
        id: ClientId,
        daemon_id: &str,
        name: &str,
        user_id: &str,
        user_email: &str,
    ) -> bool {
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        let previous = client.daemon_id.replace(daemon_id.to_string());

        if let Some(previous) = previous {
            if previous != daemon_id {
                self.unlink_daemon(&previous, id);
            }
        }

        let daemon = self
            .daemons
            .entry(daemon_id.to_string())
            .or_insert_with(|| Daemon {
                id: daemon_id.to_string(),
                name: name.to_string(),
                user_id: user_id.to_string(),
                user_email: user_email.to_string(),
                clients: Vec::new(),
            });
        daemon.name = name.to_string();
        daemon.user_id = user_id.to_string();
        daemon.user_email = user_email.to_string();
        if !daemon.clients.contains(&id) {
            daemon.clients.push(id);
        }
        true
    }

    /// One connected client presenting `hash`, the earliest-added first
    pub fn lookup_by_identity(&self, hash: &str) -> Option<ClientId> {
        self.identities
            .get(hash)
            .and_then(|members| members.first().copied())
    }

    pub fn daemon(&self, daemon_id: &str) -> Option<&Daemon> {
        self.daemons.get(daemon_id)
    }

    /// Daemon aggregate a client is bound to
    pub fn daemon_of(&self, id: ClientId) -> Option<&Daemon> {
        let daemon_id = self.clients.get(&id)?.daemon_id.as_ref()?;
        self.daemons.get(daemon_id)
    }

    /// Current revocation clock; pass it to [`Registry::revoked_since`] later
    pub fn revocation_mark(&self) -> u64 {
        self.revocation_clock
    }

    /// Whether the daemon was disconnected after `mark` was taken
    pub fn revoked_since(&self, daemon_id: &str, mark: u64) -> bool {
        self.revoked_at
            .get(daemon_id)
            .is_some_and(|revoked| *revoked > mark)
    }

    /// Drop every session bound to a daemon and mark it revoked; their
    /// sockets close once the queued frames are flushed
    pub fn disconnect_daemon(&mut self, daemon_id: &str) -> Vec<ClientId> {
        self.revocation_clock += 1;
        self.revoked_at
            .insert(daemon_id.to_string(), self.revocation_clock);

        let members = self
            .daemons
            .get(daemon_id)
            .map(|daemon| daemon.clients.clone())
            .unwrap_or_default();
        for id in &members {
            self.remove_client(*id);
        }
        members
    }

    /// Queue a frame for a client. Silently does nothing if it is gone.
    pub fn send(&self, id: ClientId, message: Outbound) -> bool {
        match self.clients.get(&id) {
            Some(client) => client.handle.send(message),
            None => {
                debug!("Registry: dropping {:?} for departed {}", message.message.kind(), id);
                false
            }
        }
    }

    fn unlink_daemon(&mut self, daemon_id: &str, id: ClientId) {
        if let Some(daemon) = self.daemons.get_mut(daemon_id) {
            daemon.clients.retain(|member| *member != id);
            if daemon.clients.is_empty() {
                self.daemons.remove(daemon_id);
            }
        }
    }

    fn unlink_identity(&mut self, hash: &str, id: ClientId) {
        if let Some(members) = self.identities.get_mut(hash) {
            members.retain(|member| *member != id);
            if members.is_empty() {
                self.identities.remove(hash);
            }
        }
    }
}
