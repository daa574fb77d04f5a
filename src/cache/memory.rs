//! Process-local cache backend

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::Cache;
use crate::types::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// DashMap-backed cache with a fixed per-entry TTL
///
/// Expired entries are dropped when read, and swept at most once per TTL
/// on writes.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
    epoch: Instant,
    /// Milliseconds after `epoch` of the last sweep
    last_cleanup: AtomicU64,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            epoch: Instant::now(),
            last_cleanup: AtomicU64::new(0),
        }
    }

    /// Drop expired entries, returning how many were removed
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    fn maybe_cleanup(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_cleanup.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.ttl.as_millis() as u64 {
            return;
        }

        if self
            .last_cleanup
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            let removed = self.cleanup();
            if removed > 0 {
                debug!(removed, "Swept expired cache entries");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let hit = self.entries.get(key).map(|entry| {
            (entry.expires_at > now).then(|| entry.value.clone())
        });
        match hit {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.maybe_cleanup();
        Ok(())
    }

    async fn unset(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new(Duration::from_secs(10));
        cache.set("k", "v").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_and_unset() {
        let cache = MemoryCache::new(Duration::from_secs(10));
        cache.set("old", "1").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.set("new", "2").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.cleanup(), 1);
        cache.unset("new").await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_entries_never_read_again() {
        let cache = MemoryCache::new(Duration::from_secs(10));
        cache.set("a", "1").await.unwrap();
        cache.set("b", "2").await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.set("c", "3").await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("c").await.unwrap().as_deref(), Some("3"));
    }
}
