//! In-memory repositories for tests and dev mode

use async_trait::async_trait;
use bson::oid::ObjectId;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::db::mongo::{Identified, MutMetadata};
use crate::db::repository::{
    ConnectionRepository, DaemonRepository, PathRepository, UserRepository,
};
use crate::db::schemas::{ConnectionDoc, DaemonDoc, PathDoc, UserDoc};
use crate::types::Result;

/// One collection held in a map keyed by id
#[derive(Debug)]
pub struct MemoryTable<T> {
    rows: RwLock<BTreeMap<ObjectId, T>>,
}

impl<T> Default for MemoryTable<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> MemoryTable<T>
where
    T: Clone + Identified + MutMetadata + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn filter<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.rows
            .read()
            .await
            .values()
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    pub async fn save(&self, mut item: T) -> ObjectId {
        let id = match item.id() {
            Some(id) => id,
            None => {
                let id = ObjectId::new();
                item.set_id(id);
                item.mut_metadata().created_at = Some(bson::DateTime::now());
                id
            }
        };
        item.mut_metadata().updated_at = Some(bson::DateTime::now());
        self.rows.write().await.insert(id, item);
        id
    }

    pub async fn delete(&self, id: ObjectId) -> u64 {
        u64::from(self.rows.write().await.remove(&id).is_some())
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl UserRepository for MemoryTable<UserDoc> {
    async fn find(&self, id: ObjectId) -> Result<Vec<UserDoc>> {
        Ok(self.filter(|u| u._id == Some(id)).await)
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<UserDoc>> {
        let email = email.to_lowercase();
        Ok(self.filter(|u| u.email == email).await)
    }

    async fn find_by_token(&self, token: &str) -> Result<Vec<UserDoc>> {
        Ok(self.filter(|u| u.token.as_deref() == Some(token)).await)
    }

    async fn find_by_confirm(&self, confirm: &str) -> Result<Vec<UserDoc>> {
        Ok(self.filter(|u| u.confirm.as_deref() == Some(confirm)).await)
    }

    async fn save(&self, user: UserDoc) -> Result<ObjectId> {
        Ok(MemoryTable::save(self, user).await)
    }

    async fn delete(&self, id: ObjectId) -> Result<u64> {
        Ok(MemoryTable::delete(self, id).await)
    }
}

#[async_trait]
impl DaemonRepository for MemoryTable<DaemonDoc> {
    async fn find(&self, id: ObjectId) -> Result<Vec<DaemonDoc>> {
        Ok(self.filter(|d| d._id == Some(id)).await)
    }

    async fn find_by_token(&self, token: &str) -> Result<Vec<DaemonDoc>> {
        Ok(self.filter(|d| d.token == token).await)
    }

    async fn find_by_user_and_name(&self, user_id: ObjectId, name: &str) -> Result<Vec<DaemonDoc>> {
        Ok(self.filter(|d| d.user_id == user_id && d.name == name).await)
    }

    async fn save(&self, daemon: DaemonDoc) -> Result<ObjectId> {
        Ok(MemoryTable::save(self, daemon).await)
    }

    async fn delete(&self, id: ObjectId) -> Result<u64> {
        Ok(MemoryTable::delete(self, id).await)
    }
}

#[async_trait]
impl PathRepository for MemoryTable<PathDoc> {
    async fn find(&self, id: ObjectId) -> Result<Vec<PathDoc>> {
        Ok(self.filter(|p| p._id == Some(id)).await)
    }

    async fn find_by_user(&self, user_id: ObjectId) -> Result<Vec<PathDoc>> {
        Ok(self.filter(|p| p.user_id == user_id).await)
    }

    async fn find_by_user_and_path(&self, user_id: ObjectId, path: &str) -> Result<Vec<PathDoc>> {
        Ok(self.filter(|p| p.user_id == user_id && p.path == path).await)
    }

    async fn save(&self, path: PathDoc) -> Result<ObjectId> {
        Ok(MemoryTable::save(self, path).await)
    }

    async fn delete(&self, id: ObjectId) -> Result<u64> {
        Ok(MemoryTable::delete(self, id).await)
    }
}

#[async_trait]
impl ConnectionRepository for MemoryTable<ConnectionDoc> {
    async fn find(&self, id: ObjectId) -> Result<Vec<ConnectionDoc>> {
        Ok(self.filter(|c| c._id == Some(id)).await)
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<ConnectionDoc>> {
        Ok(self.filter(|c| c.name == name).await)
    }

    async fn find_by_path(&self, path_id: ObjectId) -> Result<Vec<ConnectionDoc>> {
        Ok(self.filter(|c| c.path_id == path_id).await)
    }

    async fn find_by_daemon(&self, daemon_id: ObjectId) -> Result<Vec<ConnectionDoc>> {
        Ok(self.filter(|c| c.role_of(daemon_id).is_some()).await)
    }

    async fn save(&self, connection: ConnectionDoc) -> Result<ObjectId> {
        Ok(MemoryTable::save(self, connection).await)
    }

    async fn delete(&self, id: ObjectId) -> Result<u64> {
        Ok(MemoryTable::delete(self, id).await)
    }
}
