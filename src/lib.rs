//! Tracker - rendezvous server for interconnect daemons
//!
//! Daemons keep a framed TCP session open to the tracker, authenticate,
//! declare the named connections they serve or use, and ask the tracker to
//! help them find each other's routable address. No user traffic passes
//! through the tracker.
//!
//! ## Components
//!
//! - **Registry**: connected clients, daemons, identities, waiting entries and pairs
//! - **Rendezvous**: decides when a connection's server side is ready for its clients
//! - **NAT**: correlates UDP probes into a public endpoint exchange
//! - **Server**: framed sessions, static request routing, UDP listener

pub mod cache;
pub mod config;
pub mod db;
pub mod handlers;
pub mod mail;
pub mod nat;
pub mod nats;
pub mod protocol;
pub mod registry;
pub mod rendezvous;
pub mod server;
pub mod tokens;
pub mod types;

pub use config::Args;
pub use server::{start_server, AppState, BindConfig, ServerHandle, Settings};
pub use types::{Result, TrackerError};
