//! Token lookup cache
//!
//! Daemon and user lookups by token are cached as JSON. When a token is
//! rotated or a record deleted the key is unset locally and published on
//! NATS so other tracker instances drop it too.

pub mod keys;
mod memory;

pub use memory::MemoryCache;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::nats::{NatsClient, CACHE_INVALIDATE_SUBJECT};
use crate::types::Result;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn unset(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Typed front of a [`Cache`] with cross-instance invalidation
#[derive(Clone)]
pub struct TokenCache {
    backend: Arc<dyn Cache>,
    publisher: Option<NatsClient>,
}

impl TokenCache {
    pub fn new(backend: Arc<dyn Cache>, publisher: Option<NatsClient>) -> Self {
        Self { backend, publisher }
    }

    /// Local-only cache, nothing is published
    pub fn local(backend: Arc<dyn Cache>) -> Self {
        Self::new(backend, None)
    }

    pub fn backend(&self) -> &Arc<dyn Cache> {
        &self.backend
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, "Dropping undecodable cache entry: {}", e);
                self.backend.unset(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(key, &raw).await
    }

    /// Unset locally and tell the other instances
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.backend.unset(key).await?;
        self.publish(key).await;
        Ok(())
    }

    async fn publish(&self, key: &str) {
        let Some(nats) = &self.publisher else {
            return;
        };
        // other instances keep the entry until its TTL when this fails
        if let Err(e) = nats
            .publish(CACHE_INVALIDATE_SUBJECT, Bytes::from(key.to_string()))
            .await
        {
            warn!(key, "Cache invalidation publish failed: {}", e);
        }
    }
}

/// Apply one invalidation message to the local backend
pub async fn apply_invalidation(cache: &dyn Cache, payload: &[u8]) -> Result<()> {
    let Ok(key) = std::str::from_utf8(payload) else {
        warn!("Ignoring non-UTF-8 cache invalidation");
        return Ok(());
    };
    let key = key.trim();
    if key == keys::ALL_KEYS {
        debug!("Clearing cache on request");
        cache.clear().await
    } else if !key.is_empty() {
        debug!(key, "Invalidating cache key");
        cache.unset(key).await
    } else {
        Ok(())
    }
}

/// Subscribe to invalidations published by other instances
pub async fn spawn_invalidation_listener(
    nats: &NatsClient,
    cache: Arc<dyn Cache>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let mut subscriber = nats.subscribe(CACHE_INVALIDATE_SUBJECT).await?;
    info!("Listening for cache invalidations on {}", CACHE_INVALIDATE_SUBJECT);

    Ok(tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = subscriber.next() => message,
            };
            let Some(message) = message else {
                warn!("Cache invalidation subscription closed");
                break;
            };
            if let Err(e) = apply_invalidation(cache.as_ref(), &message.payload).await {
                warn!("Cache invalidation failed: {}", e);
            }
        }
    }))
}
