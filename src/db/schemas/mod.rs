//! Database schemas for the tracker
//!
//! Users own daemons and paths; each path publishes one connection.

mod connection;
mod daemon;
mod metadata;
mod path;
mod user;

pub use connection::{ConnectionDoc, CONNECTION_COLLECTION};
pub use daemon::{DaemonDoc, DAEMON_COLLECTION};
pub use metadata::Metadata;
pub use path::{PathDoc, PATH_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
