//! Repository collaborators
//!
//! Absence is an empty `Vec`, never an error; `Err` always means the store
//! itself failed.

use async_trait::async_trait;
use bson::oid::ObjectId;

use crate::db::schemas::{ConnectionDoc, DaemonDoc, PathDoc, UserDoc};
use crate::types::Result;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, id: ObjectId) -> Result<Vec<UserDoc>>;
    async fn find_by_email(&self, email: &str) -> Result<Vec<UserDoc>>;
    /// By master token
    async fn find_by_token(&self, token: &str) -> Result<Vec<UserDoc>>;
    async fn find_by_confirm(&self, confirm: &str) -> Result<Vec<UserDoc>>;
    /// Insert or update; returns the id of the stored record
    async fn save(&self, user: UserDoc) -> Result<ObjectId>;
    async fn delete(&self, id: ObjectId) -> Result<u64>;
}

#[async_trait]
pub trait DaemonRepository: Send + Sync {
    async fn find(&self, id: ObjectId) -> Result<Vec<DaemonDoc>>;
    async fn find_by_token(&self, token: &str) -> Result<Vec<DaemonDoc>>;
    async fn find_by_user_and_name(&self, user_id: ObjectId, name: &str) -> Result<Vec<DaemonDoc>>;
    async fn save(&self, daemon: DaemonDoc) -> Result<ObjectId>;
    async fn delete(&self, id: ObjectId) -> Result<u64>;
}

#[async_trait]
pub trait PathRepository: Send + Sync {
    async fn find(&self, id: ObjectId) -> Result<Vec<PathDoc>>;
    async fn find_by_user(&self, user_id: ObjectId) -> Result<Vec<PathDoc>>;
    async fn find_by_user_and_path(&self, user_id: ObjectId, path: &str) -> Result<Vec<PathDoc>>;
    async fn save(&self, path: PathDoc) -> Result<ObjectId>;
    async fn delete(&self, id: ObjectId) -> Result<u64>;
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn find(&self, id: ObjectId) -> Result<Vec<ConnectionDoc>>;
    async fn find_by_name(&self, name: &str) -> Result<Vec<ConnectionDoc>>;
    async fn find_by_path(&self, path_id: ObjectId) -> Result<Vec<ConnectionDoc>>;
    /// Connections the daemon is attached to in either role
    async fn find_by_daemon(&self, daemon_id: ObjectId) -> Result<Vec<ConnectionDoc>>;
    async fn save(&self, connection: ConnectionDoc) -> Result<ObjectId>;
    async fn delete(&self, id: ObjectId) -> Result<u64>;
}
