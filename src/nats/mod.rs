//! NATS messaging
//!
//! Used only to fan cache invalidations out to the other tracker instances.

mod client;

pub use client::NatsClient;

/// Subject carrying invalidated cache keys (`*` clears everything)
pub const CACHE_INVALIDATE_SUBJECT: &str = "tracker.cache.invalidate";
