//! MongoDB-backed repositories

use async_trait::async_trait;
use bson::{doc, oid::ObjectId};

use crate::db::mongo::MongoCollection;
use crate::db::repository::{
    ConnectionRepository, DaemonRepository, PathRepository, UserRepository,
};
use crate::db::schemas::{ConnectionDoc, DaemonDoc, PathDoc, UserDoc};
use crate::types::Result;

#[async_trait]
impl UserRepository for MongoCollection<UserDoc> {
    async fn find(&self, id: ObjectId) -> Result<Vec<UserDoc>> {
        self.find_many(doc! { "_id": id }).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<UserDoc>> {
        self.find_many(doc! { "email": email.to_lowercase() }).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Vec<UserDoc>> {
        self.find_many(doc! { "token": token }).await
    }

    async fn find_by_confirm(&self, confirm: &str) -> Result<Vec<UserDoc>> {
        self.find_many(doc! { "confirm": confirm }).await
    }

    async fn save(&self, user: UserDoc) -> Result<ObjectId> {
        MongoCollection::save(self, user).await
    }

    async fn delete(&self, id: ObjectId) -> Result<u64> {
        self.delete_one(id).await
    }
}

#[async_trait]
impl DaemonRepository for MongoCollection<DaemonDoc> {
    async fn find(&self, id: ObjectId) -> Result<Vec<DaemonDoc>> {
        self.find_many(doc! { "_id": id }).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Vec<DaemonDoc>> {
        self.find_many(doc! { "token": token }).await
    }

    async fn find_by_user_and_name(&self, user_id: ObjectId, name: &str) -> Result<Vec<DaemonDoc>> {
        self.find_many(doc! { "user_id": user_id, "name": name }).await
    }

    async fn save(&self, daemon: DaemonDoc) -> Result<ObjectId> {
        MongoCollection::save(self, daemon).await
    }

    async fn delete(&self, id: ObjectId) -> Result<u64> {
        self.delete_one(id).await
    }
}

#[async_trait]
impl PathRepository for MongoCollection<PathDoc> {
    async fn find(&self, id: ObjectId) -> Result<Vec<PathDoc>> {
        self.find_many(doc! { "_id": id }).await
    }

    async fn find_by_user(&self, user_id: ObjectId) -> Result<Vec<PathDoc>> {
        self.find_many(doc! { "user_id": user_id }).await
    }

    async fn find_by_user_and_path(&self, user_id: ObjectId, path: &str) -> Result<Vec<PathDoc>> {
        self.find_many(doc! { "user_id": user_id, "path": path }).await
    }

    async fn save(&self, path: PathDoc) -> Result<ObjectId> {
        MongoCollection::save(self, path).await
    }

    async fn delete(&self, id: ObjectId) -> Result<u64> {
        self.delete_one(id).await
    }
}

#[async_trait]
impl ConnectionRepository for MongoCollection<ConnectionDoc> {
    async fn find(&self, id: ObjectId) -> Result<Vec<ConnectionDoc>> {
        self.find_many(doc! { "_id": id }).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<ConnectionDoc>> {
        self.find_many(doc! { "name": name }).await
    }

    async fn find_by_path(&self, path_id: ObjectId) -> Result<Vec<ConnectionDoc>> {
        self.find_many(doc! { "path_id": path_id }).await
    }

    async fn find_by_daemon(&self, daemon_id: ObjectId) -> Result<Vec<ConnectionDoc>> {
        self.find_many(doc! {
            "$or": [
                { "server_daemon_id": daemon_id },
                { "client_daemon_ids": daemon_id },
            ]
        })
        .await
    }

    async fn save(&self, connection: ConnectionDoc) -> Result<ObjectId> {
        MongoCollection::save(self, connection).await
    }

    async fn delete(&self, id: ObjectId) -> Result<u64> {
        self.delete_one(id).await
    }
}
