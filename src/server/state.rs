//! Shared application state handed to every session and handler

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{MemoryCache, TokenCache};
use crate::config::{Args, DEFAULT_MAX_FRAME_BYTES, DEFAULT_PUNCH_TIMEOUT_MS};
use crate::db::Repositories;
use crate::mail::{LogMailer, Mailer};
use crate::registry::{Registry, SharedRegistry};

/// Tunables resolved from [`Args`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub punch_timeout: Duration,
    pub pair_sweep_interval: Duration,
    pub max_frame_bytes: usize,
    pub max_clients: usize,
    /// Routed handlers running at once for one session
    pub max_in_flight: usize,
    pub cache_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            punch_timeout: Duration::from_millis(DEFAULT_PUNCH_TIMEOUT_MS),
            pair_sweep_interval: Duration::from_secs(1),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_clients: 32_768,
            max_in_flight: 32,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl Settings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            punch_timeout: args.punch_timeout(),
            pair_sweep_interval: args.pair_sweep_interval(),
            max_frame_bytes: args.max_frame_bytes,
            max_clients: args.max_clients,
            max_in_flight: args.max_in_flight,
            cache_ttl: args.cache_ttl(),
        }
    }
}

pub struct AppState {
    pub settings: Settings,
    /// The only shared mutable session state
    pub registry: SharedRegistry,
    pub repos: Repositories,
    pub cache: TokenCache,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        repos: Repositories,
        cache: TokenCache,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            settings,
            registry: Registry::new().shared(),
            repos,
            cache,
            mailer,
        }
    }

    /// Fully in-process state: memory repositories, local cache, log mailer
    pub fn in_memory(settings: Settings) -> Self {
        let cache = TokenCache::local(Arc::new(MemoryCache::new(settings.cache_ttl)));
        Self::new(settings, Repositories::memory(), cache, Arc::new(LogMailer))
    }
}
