//! Pending two-sided address exchanges

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

use crate::registry::ClientId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSide {
    pub request_id: String,
    pub client_id: ClientId,
    /// Source of the first UDP probe seen for `request_id`
    pub address: Option<SocketAddr>,
}

impl PairSide {
    fn new(request_id: &str, client_id: ClientId) -> Self {
        Self {
            request_id: request_id.to_string(),
            client_id,
            address: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub connection_name: String,
    pub server: PairSide,
    pub client: PairSide,
    pub expires_at: Instant,
}

impl Pair {
    pub fn is_complete(&self) -> bool {
        self.server.address.is_some() && self.client.address.is_some()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Recorded {
    /// No live pair owns the request id
    Unknown,
    /// That side already has an address
    Duplicate,
    Waiting,
    /// Both sides known; the pair has been removed
    Completed(Pair),
}

/// Pairs indexed by both of their request ids
#[derive(Debug, Default)]
pub struct PairTable {
    pairs: HashMap<u64, Pair>,
    by_request: HashMap<String, u64>,
    next_id: u64,
}

impl PairTable {
    /// Register a pair; false if either request id is already in use
    pub fn create(
        &mut self,
        server_request_id: &str,
        client_request_id: &str,
        connection_name: &str,
        server: ClientId,
        client: ClientId,
        timeout: Duration,
    ) -> bool {
        if server_request_id == client_request_id
            || self.by_request.contains_key(server_request_id)
            || self.by_request.contains_key(client_request_id)
        {
            return false;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.pairs.insert(
            id,
            Pair {
                connection_name: connection_name.to_string(),
                server: PairSide::new(server_request_id, server),
                client: PairSide::new(client_request_id, client),
                expires_at: Instant::now() + timeout,
            },
        );
        self.by_request.insert(server_request_id.to_string(), id);
        self.by_request.insert(client_request_id.to_string(), id);
        true
    }

    pub fn get(&self, request_id: &str) -> Option<&Pair> {
        let id = self.by_request.get(request_id)?;
        self.pairs.get(id)
    }

    pub(crate) fn record(&mut self, request_id: &str, address: SocketAddr, now: Instant) -> Recorded {
        let Some(&id) = self.by_request.get(request_id) else {
            return Recorded::Unknown;
        };

        let expired = self.pairs.get(&id).map_or(true, |pair| pair.is_expired(now));
        if expired {
            self.remove(id);
            return Recorded::Unknown;
        }

        let Some(pair) = self.pairs.get_mut(&id) else {
            return Recorded::Unknown;
        };
        let side = if pair.server.request_id == request_id {
            &mut pair.server
        } else {
            &mut pair.client
        };
        if side.address.is_some() {
            return Recorded::Duplicate;
        }
        side.address = Some(address);

        if !pair.is_complete() {
            return Recorded::Waiting;
        }
        match self.remove(id) {
            Some(pair) => Recorded::Completed(pair),
            None => Recorded::Unknown,
        }
    }

    /// Remove the pair owning `request_id`
    pub fn cancel(&mut self, request_id: &str) -> Option<Pair> {
        let id = *self.by_request.get(request_id)?;
        self.remove(id)
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .pairs
            .iter()
            .filter(|(_, pair)| pair.is_expired(now))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.remove(*id);
        }
        expired.len()
    }

    /// Drop every pair one of whose sides belongs to `client`
    pub fn purge_client(&mut self, client: ClientId) -> usize {
        let owned: Vec<u64> = self
            .pairs
            .iter()
            .filter(|(_, pair)| pair.server.client_id == client || pair.client.client_id == client)
            .map(|(id, _)| *id)
            .collect();
        for id in &owned {
            self.remove(*id);
        }
        owned.len()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn references(&self, client: ClientId) -> bool {
        self.pairs
            .values()
            .any(|pair| pair.server.client_id == client || pair.client.client_id == client)
    }

    fn remove(&mut self, id: u64) -> Option<Pair> {
        let pair = self.pairs.remove(&id)?;
        self.by_request.remove(&pair.server.request_id);
        self.by_request.remove(&pair.client.request_id);
        Some(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn table_fixture() -> PairTable {
        let mut table = PairTable::default();
        assert!(table.create(
            "r1",
            "r2",
            "x@y.com?/c",
            ClientId::new(1),
            ClientId::new(2),
            Duration::from_secs(5),
        ));
        table
    }

    #[test]
    fn test_request_ids_must_be_unique() {
        let mut table = table_fixture();
        assert!(!table.create("r1", "r3", "x@y.com?/c", ClientId::new(1), ClientId::new(2), Duration::from_secs(5)));
        assert!(!table.create("r4", "r4", "x@y.com?/c", ClientId::new(1), ClientId::new(2), Duration::from_secs(5)));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_address_per_side_wins() {
        let mut table = table_fixture();
        let now = Instant::now();
        assert_eq!(table.record("r1", addr("1.2.3.4:1111"), now), Recorded::Waiting);
        assert_eq!(table.record("r1", addr("9.9.9.9:9999"), now), Recorded::Duplicate);
        assert_eq!(table.get("r2").and_then(|p| p.server.address), Some(addr("1.2.3.4:1111")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_removes_pair() {
        let mut table = table_fixture();
        let now = Instant::now();
        table.record("r2", addr("5.6.7.8:2222"), now);
        match table.record("r1", addr("1.2.3.4:1111"), now) {
            Recorded::Completed(pair) => {
                assert_eq!(pair.server.address, Some(addr("1.2.3.4:1111")));
                assert_eq!(pair.client.address, Some(addr("5.6.7.8:2222")));
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(table.is_empty());
        assert_eq!(table.record("r1", addr("1.2.3.4:1111"), now), Recorded::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_pair_is_dropped_on_record() {
        let mut table = table_fixture();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(table.record("r1", addr("1.2.3.4:1111"), Instant::now()), Recorded::Unknown);
        assert!(table.is_empty());
        assert!(table.get("r2").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let mut table = table_fixture();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(table.create("r3", "r4", "x@y.com?/d", ClientId::new(3), ClientId::new(4), Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(table.purge_expired(Instant::now()), 1);
        assert!(table.get("r1").is_none());
        assert!(table.get("r3").is_some());
    }

    #[test]
    fn test_purge_client_and_cancel() {
        let mut table = table_fixture();
        assert_eq!(table.purge_client(ClientId::new(2)), 1);
        assert!(!table.references(ClientId::new(1)));

        let mut table = table_fixture();
        assert!(table.cancel("r2").is_some());
        assert!(table.cancel("r1").is_none());
    }
}
