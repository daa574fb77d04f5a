//! NAT traversal coordinator
//!
//! A punch attempt creates a [`Pair`] with one request id per side and asks
//! both daemons (ADDRESS_REQUEST) to send a UDP probe carrying their id. The
//! UDP listener records each probe's *observed* source address; once both
//! are known the pair is removed and each side receives the other's public
//! endpoint in a PEER_AVAILABLE push. Pairs that do not complete in time are
//! dropped silently.

mod pairs;
pub mod udp;

pub use pairs::{Pair, PairSide, PairTable};

use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::{AddressRequest, Outbound, PeerAvailable, ServerMessage};
use crate::registry::{ClientId, Registry, SharedRegistry};
use pairs::Recorded;

/// What a UDP probe did to the pair table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Unknown or expired request id
    Ignored,
    Recorded,
    /// Side already recorded; the first observed address is kept
    Retransmitted,
    Completed,
}

/// Request ids handed to the two sides of a punch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunchIds {
    pub server_request_id: String,
    pub client_request_id: String,
}

impl Registry {
    pub fn create_pair(
        &mut self,
        server_request_id: &str,
        client_request_id: &str,
        connection_name: &str,
        server: ClientId,
        client: ClientId,
        timeout: Duration,
    ) -> bool {
        let created = self.pairs.create(
            server_request_id,
            client_request_id,
            connection_name,
            server,
            client,
            timeout,
        );
        if created {
            debug!(
                connection = connection_name,
                server = %server,
                client = %client,
                "Pair created"
            );
        }
        created
    }

    /// Create a pair with fresh ids and ask both sides for a probe
    pub fn start_punch(
        &mut self,
        connection_name: &str,
        server: ClientId,
        client: ClientId,
        timeout: Duration,
    ) -> Option<PunchIds> {
        if !self.contains(server) || !self.contains(client) {
            return None;
        }

        let ids = PunchIds {
            server_request_id: Uuid::new_v4().to_string(),
            client_request_id: Uuid::new_v4().to_string(),
        };
        if !self.create_pair(
            &ids.server_request_id,
            &ids.client_request_id,
            connection_name,
            server,
            client,
            timeout,
        ) {
            return None;
        }

        for (target, request_id) in [
            (server, &ids.server_request_id),
            (client, &ids.client_request_id),
        ] {
            self.send(
                target,
                Outbound::push(ServerMessage::AddressRequest(AddressRequest {
                    request_id: request_id.clone(),
                    connection_name: connection_name.to_string(),
                })),
            );
        }
        Some(ids)
    }

    /// Record the observed source of a probe carrying `request_id`
    pub fn record_address(&mut self, request_id: &str, observed: SocketAddr) -> ProbeOutcome {
        match self.pairs.record(request_id, observed, Instant::now()) {
            Recorded::Unknown => ProbeOutcome::Ignored,
            Recorded::Duplicate => {
                debug!(request_id, %observed, "Probe retransmitted");
                ProbeOutcome::Retransmitted
            }
            Recorded::Waiting => {
                debug!(request_id, %observed, "Probe recorded");
                ProbeOutcome::Recorded
            }
            Recorded::Completed(pair) => {
                self.exchange_addresses(&pair);
                ProbeOutcome::Completed
            }
        }
    }

    /// Remove the pair owning `request_id` on behalf of one of its sides
    pub fn cancel_pair(&mut self, request_id: &str, requester: ClientId) -> bool {
        let owned = self.pairs.get(request_id).is_some_and(|pair| {
            (pair.server.request_id == request_id && pair.server.client_id == requester)
                || (pair.client.request_id == request_id && pair.client.client_id == requester)
        });
        if owned {
            self.pairs.cancel(request_id);
            debug!(request_id, client = %requester, "Pair cancelled");
        }
        owned
    }

    pub fn purge_expired_pairs(&mut self) -> usize {
        self.pairs.purge_expired(Instant::now())
    }

    pub fn pending_pairs(&self) -> usize {
        self.pairs.len()
    }

    fn exchange_addresses(&self, pair: &Pair) {
        let (Some(server_addr), Some(client_addr)) = (pair.server.address, pair.client.address)
        else {
            return;
        };
        self.send(pair.server.client_id, peer_available(&pair.connection_name, client_addr));
        self.send(pair.client.client_id, peer_available(&pair.connection_name, server_addr));
        debug!(
            connection = %pair.connection_name,
            server = %server_addr,
            client = %client_addr,
            "Peer addresses exchanged"
        );
    }
}

fn peer_available(connection_name: &str, address: SocketAddr) -> Outbound {
    Outbound::push(ServerMessage::PeerAvailable(PeerAvailable {
        connection_name: connection_name.to_string(),
        address: address.ip().to_string(),
        port: address.port(),
    }))
}

/// Periodically drop pairs that outlived their timeout
pub fn spawn_sweep_task(
    registry: SharedRegistry,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.lock().await.purge_expired_pairs();
                    if removed > 0 {
                        debug!("Pair sweep: removed {} expired pairs", removed);
                    }
                }
            }
        }
    });
    info!("Pair sweep task started");
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{connect, is_referenced};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn peer(outbound: Outbound) -> PeerAvailable {
        match outbound.message {
            ServerMessage::PeerAvailable(peer) => peer,
            other => panic!("expected PEER_AVAILABLE, got {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_completed_pair_exchanges_observed_addresses() {
        let mut registry = Registry::new();
        let (c1, mut r1) = connect(&mut registry, 1);
        let (c2, mut r2) = connect(&mut registry, 2);
        assert!(registry.create_pair("r1", "r2", "conn", c1, c2, Duration::from_millis(5000)));

        assert_eq!(registry.record_address("r1", addr("1.2.3.4:1111")), ProbeOutcome::Recorded);
        assert!(r1.try_recv().is_err());
        assert_eq!(registry.record_address("r2", addr("5.6.7.8:2222")), ProbeOutcome::Completed);

        let to_c1 = peer(r1.try_recv().expect("c1 push"));
        assert_eq!((to_c1.address.as_str(), to_c1.port), ("5.6.7.8", 2222));
        assert_eq!(to_c1.connection_name, "conn");
        let to_c2 = peer(r2.try_recv().expect("c2 push"));
        assert_eq!((to_c2.address.as_str(), to_c2.port), ("1.2.3.4", 1111));
        assert!(r1.try_recv().is_err() && r2.try_recv().is_err());

        assert_eq!(registry.record_address("r1", addr("1.2.3.4:1111")), ProbeOutcome::Ignored);
        assert!(r1.try_recv().is_err() && r2.try_recv().is_err());
        assert_eq!(registry.pending_pairs(), 0);
    }

    #[tokio::test]
    async fn test_start_punch_sends_address_requests() {
        let mut registry = Registry::new();
        let (server, mut rs) = connect(&mut registry, 1);
        let (client, mut rc) = connect(&mut registry, 2);

        let ids = registry
            .start_punch("x@y.com?/c", server, client, Duration::from_secs(5))
            .expect("pair");
        assert_ne!(ids.server_request_id, ids.client_request_id);

        match rs.try_recv().map(|o| o.message) {
            Ok(ServerMessage::AddressRequest(req)) => {
                assert_eq!(req.request_id, ids.server_request_id);
                assert_eq!(req.connection_name, "x@y.com?/c");
            }
            other => panic!("unexpected {other:?}"),
        }
        match rc.try_recv().map(|o| o.message) {
            Ok(ServerMessage::AddressRequest(req)) => {
                assert_eq!(req.request_id, ids.client_request_id)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_punch_requires_both_sides() {
        let mut registry = Registry::new();
        let (client, _rc) = connect(&mut registry, 2);
        assert!(registry
            .start_punch("x@y.com?/c", ClientId::new(99), client, Duration::from_secs(5))
            .is_none());
        assert_eq!(registry.pending_pairs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_pair_sends_nothing() {
        let mut registry = Registry::new();
        let (c1, mut r1) = connect(&mut registry, 1);
        let (c2, mut r2) = connect(&mut registry, 2);
        registry.create_pair("r1", "r2", "conn", c1, c2, Duration::from_millis(5000));
        registry.record_address("r1", addr("1.2.3.4:1111"));

        tokio::time::advance(Duration::from_millis(5001)).await;
        assert_eq!(registry.record_address("r2", addr("5.6.7.8:2222")), ProbeOutcome::Ignored);
        assert!(r1.try_recv().is_err() && r2.try_recv().is_err());
        assert_eq!(registry.pending_pairs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_purges_expired_pairs() {
        let shared = Registry::new().shared();
        {
            let mut registry = shared.lock().await;
            let (c1, _) = connect(&mut registry, 1);
            let (c2, _) = connect(&mut registry, 2);
            registry.create_pair("r1", "r2", "conn", c1, c2, Duration::from_millis(500));
        }

        let shutdown = CancellationToken::new();
        let task = spawn_sweep_task(shared.clone(), Duration::from_millis(100), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(shared.lock().await.pending_pairs(), 0);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_cancel_requires_ownership() {
        let mut registry = Registry::new();
        let (c1, _r1) = connect(&mut registry, 1);
        let (c2, _r2) = connect(&mut registry, 2);
        let (c3, _r3) = connect(&mut registry, 3);
        registry.create_pair("r1", "r2", "conn", c1, c2, Duration::from_secs(5));

        assert!(!registry.cancel_pair("r1", c3));
        assert!(!registry.cancel_pair("r1", c2));
        assert!(registry.cancel_pair("r2", c2));
        assert_eq!(registry.pending_pairs(), 0);
    }

    #[test]
    fn test_pair_dropped_with_client() {
        let mut registry = Registry::new();
        let (c1, _r1) = connect(&mut registry, 1);
        let (c2, mut r2) = connect(&mut registry, 2);
        registry.create_pair("r1", "r2", "conn", c1, c2, Duration::from_secs(5));
        registry.record_address("r2", addr("5.6.7.8:2222"));

        registry.remove_client(c1);
        assert!(!is_referenced(&registry, c1));
        assert_eq!(registry.record_address("r1", addr("1.2.3.4:1111")), ProbeOutcome::Ignored);
        assert!(r2.try_recv().is_err());
    }
}
