//! Rendezvous engine
//!
//! STATUS reports build a [`Waiting`] entry per connection name: the client
//! currently serving it and the clients waiting to hear about it. When both
//! are present [`Registry::check_waiting`] snapshots the targets, clears them
//! and hands back a [`WaitingResult`]; each readiness transition therefore
//! notifies a target at most once until it reports again.

mod names;

pub use names::{
    is_within, validate_connection_name, validate_daemon_name, validate_email, validate_path,
    ConnectionName,
};

use std::collections::HashMap;
use tracing::debug;

use crate::protocol::{ActingAs, Outbound, ServerAvailable, ServerMessage};
use crate::registry::{ClientId, ConnectionStatus, Registry};

/// Accumulated STATUS state for one connection name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Waiting {
    pub server: Option<ClientId>,
    pub internal_addresses: Vec<String>,
    pub targets: Vec<ClientId>,
}

impl Waiting {
    fn is_empty(&self) -> bool {
        self.server.is_none() && self.targets.is_empty()
    }
}

/// Snapshot taken when a connection became ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingResult {
    pub connection_name: String,
    /// `<owner email>?<daemon name>` of the server side
    pub server_name: String,
    pub internal_addresses: Vec<String>,
    pub targets: Vec<ClientId>,
}

#[derive(Debug, Default)]
pub struct WaitingTable {
    entries: HashMap<String, Waiting>,
}

impl WaitingTable {
    pub fn get(&self, name: &str) -> Option<&Waiting> {
        self.entries.get(name)
    }

    pub fn server_of(&self, name: &str) -> Option<ClientId> {
        self.entries.get(name).and_then(|waiting| waiting.server)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&mut self, name: &str) -> &mut Waiting {
        self.entries.entry(name.to_string()).or_default()
    }

    /// Drop every reference to `id`; entries left with nothing are removed
    pub fn purge_client(&mut self, id: ClientId) {
        self.entries.retain(|_, waiting| {
            if waiting.server == Some(id) {
                waiting.server = None;
                waiting.internal_addresses.clear();
            }
            waiting.targets.retain(|target| *target != id);
            !waiting.is_empty()
        });
    }

    #[cfg(test)]
    pub(crate) fn references(&self, id: ClientId) -> bool {
        self.entries
            .values()
            .any(|waiting| waiting.server == Some(id) || waiting.targets.contains(&id))
    }
}

impl Registry {
    /// Apply one STATUS report; false if the client is no longer registered
    pub fn update_connection(
        &mut self,
        name: &str,
        id: ClientId,
        acting_as: ActingAs,
        active: bool,
        connected: u32,
        internal_addresses: &[String],
    ) -> bool {
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        client.connections.insert(
            name.to_string(),
            ConnectionStatus {
                acting_as,
                active,
                connected,
            },
        );
        if !internal_addresses.is_empty() {
            client.set_internal_addresses(internal_addresses);
        }

        let waiting = self.waiting.entry(name);
        match acting_as {
            ActingAs::Server => {
                // last report wins, see DESIGN.md
                waiting.server = Some(id);
                waiting.internal_addresses = internal_addresses.to_vec();
            }
            ActingAs::Client if active => {
                if !waiting.targets.contains(&id) {
                    waiting.targets.push(id);
                }
            }
            ActingAs::Client => {
                waiting.targets.retain(|target| *target != id);
            }
        }

        debug!(
            connection = name,
            client = %id,
            ?acting_as,
            active,
            connected,
            "Connection status updated"
        );
        true
    }

    /// Readiness check; drains the targets when it fires
    pub fn check_waiting(&mut self, name: &str) -> Option<WaitingResult> {
        let waiting = self.waiting.entries.get(name)?;
        let server = waiting.server?;
        if waiting.targets.is_empty() {
            return None;
        }

        let server_name = self
            .clients
            .get(&server)
            .and_then(|client| client.daemon_id.as_ref())
            .and_then(|daemon_id| self.daemons.get(daemon_id))
            .map(|daemon| daemon.descriptor())
            .unwrap_or_default();

        let waiting = self.waiting.entries.get_mut(name)?;
        let result = WaitingResult {
            connection_name: name.to_string(),
            server_name,
            internal_addresses: waiting.internal_addresses.clone(),
            targets: std::mem::take(&mut waiting.targets),
        };

        debug!(
            connection = name,
            server = %server,
            targets = result.targets.len(),
            "Connection ready"
        );
        Some(result)
    }

    /// Push SERVER_AVAILABLE to every target of a snapshot
    pub fn notify_waiting(&self, result: &WaitingResult) -> usize {
        let message = ServerMessage::ServerAvailable(ServerAvailable {
            connection_name: result.connection_name.clone(),
            daemon_name: result.server_name.clone(),
            internal_addresses: result.internal_addresses.clone(),
        });
        result
            .targets
            .iter()
            .filter(|target| self.send(**target, Outbound::push(message.clone())))
            .count()
    }

    /// Update, check and notify as one transition
    pub fn report_status(
        &mut self,
        name: &str,
        id: ClientId,
        acting_as: ActingAs,
        active: bool,
        connected: u32,
        internal_addresses: &[String],
    ) -> Option<WaitingResult> {
        if !self.update_connection(name, id, acting_as, active, connected, internal_addresses) {
            return None;
        }
        let result = self.check_waiting(name)?;
        self.notify_waiting(&result);
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{connect, is_referenced};

    const CONN: &str = "x@y.com?/conn1";

    #[test]
    fn test_server_then_client_becomes_ready_once() {
        let mut registry = Registry::new();
        let (a, _ra) = connect(&mut registry, 1);
        let (b, _rb) = connect(&mut registry, 2);
        registry.bind_daemon(a, "d-a", "server", "u1", "x@y.com");

        registry.update_connection(CONN, a, ActingAs::Server, true, 1, &["10.0.0.5".into()]);
        assert_eq!(registry.check_waiting(CONN), None);

        registry.update_connection(CONN, b, ActingAs::Client, true, 0, &[]);
        let result = registry.check_waiting(CONN).expect("ready");
        assert_eq!(result.targets, vec![b]);
        assert_eq!(result.internal_addresses, vec!["10.0.0.5".to_string()]);
        assert_eq!(result.server_name, "x@y.com?server");

        assert_eq!(registry.check_waiting(CONN), None);
    }

    #[test]
    fn test_check_waiting_without_server_is_none() {
        let mut registry = Registry::new();
        let (b, _rb) = connect(&mut registry, 2);
        registry.update_connection(CONN, b, ActingAs::Client, true, 0, &[]);
        assert_eq!(registry.check_waiting(CONN), None);
        assert_eq!(registry.check_waiting("nobody@y.com?/none"), None);
        // target survives until a server shows up
        assert_eq!(registry.waiting.get(CONN).map(|w| w.targets.clone()), Some(vec![b]));
    }

    #[test]
    fn test_inactive_client_is_removed_from_targets() {
        let mut registry = Registry::new();
        let (a, _ra) = connect(&mut registry, 1);
        let (b, _rb) = connect(&mut registry, 2);
        registry.update_connection(CONN, b, ActingAs::Client, true, 0, &[]);
        registry.update_connection(CONN, b, ActingAs::Client, false, 0, &[]);
        registry.update_connection(CONN, a, ActingAs::Server, true, 0, &[]);
        assert_eq!(registry.check_waiting(CONN), None);
    }

    #[test]
    fn test_targets_must_report_again_after_drain() {
        let mut registry = Registry::new();
        let (a, _ra) = connect(&mut registry, 1);
        let (b, _rb) = connect(&mut registry, 2);
        registry.update_connection(CONN, a, ActingAs::Server, true, 0, &[]);
        registry.update_connection(CONN, b, ActingAs::Client, true, 0, &[]);
        assert!(registry.check_waiting(CONN).is_some());

        // a fresh server report alone does not re-notify the drained target
        registry.update_connection(CONN, a, ActingAs::Server, true, 0, &["10.0.0.9".into()]);
        assert_eq!(registry.check_waiting(CONN), None);

        registry.update_connection(CONN, b, ActingAs::Client, true, 0, &[]);
        let again = registry.check_waiting(CONN).expect("ready again");
        assert_eq!(again.internal_addresses, vec!["10.0.0.9".to_string()]);
    }

    #[test]
    fn test_latest_server_report_wins() {
        let mut registry = Registry::new();
        let (a, _ra) = connect(&mut registry, 1);
        let (c, _rc) = connect(&mut registry, 3);
        registry.update_connection(CONN, a, ActingAs::Server, true, 0, &["10.0.0.1".into()]);
        registry.update_connection(CONN, c, ActingAs::Server, true, 0, &["10.0.0.3".into()]);
        assert_eq!(registry.waiting.server_of(CONN), Some(c));
        assert_eq!(
            registry.waiting.get(CONN).map(|w| w.internal_addresses.clone()),
            Some(vec!["10.0.0.3".to_string()])
        );
    }

    #[test]
    fn test_report_status_pushes_server_available() {
        let mut registry = Registry::new();
        let (a, _ra) = connect(&mut registry, 1);
        let (b, mut rb) = connect(&mut registry, 2);
        registry.bind_daemon(a, "d-a", "server", "u1", "x@y.com");

        assert!(registry
            .report_status(CONN, a, ActingAs::Server, true, 0, &["10.0.0.5".into()])
            .is_none());
        assert!(registry
            .report_status(CONN, b, ActingAs::Client, true, 0, &[])
            .is_some());

        let push = rb.try_recv().expect("push");
        assert_eq!(push.message_id, None);
        assert_eq!(
            push.message,
            ServerMessage::ServerAvailable(ServerAvailable {
                connection_name: CONN.into(),
                daemon_name: "x@y.com?server".into(),
                internal_addresses: vec!["10.0.0.5".into()],
            })
        );
        assert!(rb.try_recv().is_err());
    }

    #[test]
    fn test_unregistered_client_report_ignored() {
        let mut registry = Registry::new();
        assert!(!registry.update_connection(CONN, ClientId::new(7), ActingAs::Server, true, 0, &[]));
        assert!(registry.waiting.is_empty());
    }

    #[test]
    fn test_removed_server_and_targets_leave_no_reference() {
        let mut registry = Registry::new();
        let (a, _ra) = connect(&mut registry, 1);
        let (b, _rb) = connect(&mut registry, 2);
        let (c, _rc) = connect(&mut registry, 3);
        registry.update_connection(CONN, a, ActingAs::Server, true, 0, &[]);
        registry.update_connection(CONN, b, ActingAs::Client, true, 0, &[]);
        registry.update_connection(CONN, c, ActingAs::Client, true, 0, &[]);
        registry.update_connection("x@y.com?/other", b, ActingAs::Client, true, 0, &[]);

        registry.remove_client(a);
        registry.remove_client(b);
        for id in [a, b] {
            assert!(!is_referenced(&registry, id));
        }
        assert_eq!(registry.waiting.get(CONN).map(|w| w.targets.clone()), Some(vec![c]));
        // only b was waiting there
        assert!(registry.waiting.get("x@y.com?/other").is_none());
    }
}
