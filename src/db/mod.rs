//! Database layer
//!
//! Repository traits with MongoDB and in-memory implementations.

pub mod memory;
pub mod mongo;
pub mod mongo_repos;
pub mod repository;
pub mod schemas;

pub use memory::MemoryTable;
pub use mongo::{MongoClient, MongoCollection};
pub use repository::{ConnectionRepository, DaemonRepository, PathRepository, UserRepository};

use std::sync::Arc;

use crate::types::Result;
use schemas::{CONNECTION_COLLECTION, DAEMON_COLLECTION, PATH_COLLECTION, USER_COLLECTION};

/// The four repositories the handlers depend on
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub daemons: Arc<dyn DaemonRepository>,
    pub paths: Arc<dyn PathRepository>,
    pub connections: Arc<dyn ConnectionRepository>,
}

impl Repositories {
    /// Process-local storage, lost on exit
    pub fn memory() -> Self {
        Self {
            users: Arc::new(MemoryTable::<schemas::UserDoc>::new()),
            daemons: Arc::new(MemoryTable::<schemas::DaemonDoc>::new()),
            paths: Arc::new(MemoryTable::<schemas::PathDoc>::new()),
            connections: Arc::new(MemoryTable::<schemas::ConnectionDoc>::new()),
        }
    }

    /// Open every collection, creating indexes as needed
    pub async fn mongo(client: &MongoClient) -> Result<Self> {
        let users = client.collection::<schemas::UserDoc>(USER_COLLECTION).await?;
        let daemons = client.collection::<schemas::DaemonDoc>(DAEMON_COLLECTION).await?;
        let paths = client.collection::<schemas::PathDoc>(PATH_COLLECTION).await?;
        let connections = client
            .collection::<schemas::ConnectionDoc>(CONNECTION_COLLECTION)
            .await?;

        Ok(Self {
            users: Arc::new(users),
            daemons: Arc::new(daemons),
            paths: Arc::new(paths),
            connections: Arc::new(connections),
        })
    }
}
