//! Protocol handlers
//!
//! One async function per request type. Expected outcomes (unknown token,
//! bad name, missing record) come back as the response's result code;
//! `Err` is reserved for storage and cache failures, which the router logs
//! without replying.
//!
//! Handlers check the registry again after every await before mutating it,
//! since the requesting client may have disconnected meanwhile.

pub mod account;
pub mod admin;
pub mod punch;
pub mod session;

use bson::oid::ObjectId;

use crate::cache::keys;
use crate::db::schemas::{DaemonDoc, UserDoc};
use crate::registry::ClientId;
use crate::server::AppState;
use crate::types::Result;

/// Confirmed user holding `token` as master token
pub(crate) async fn user_by_token(state: &AppState, token: &str) -> Result<Option<UserDoc>> {
    if token.is_empty() {
        return Ok(None);
    }
    let key = keys::user_by_token(token);
    if let Some(user) = state.cache.get_json::<UserDoc>(&key).await? {
        return Ok(Some(user));
    }

    let user = state.repos.users.find_by_token(token).await?.into_iter().next();
    if let Some(user) = &user {
        state.cache.set_json(&key, user).await?;
    }
    Ok(user)
}

pub(crate) async fn daemon_by_token(state: &AppState, token: &str) -> Result<Option<DaemonDoc>> {
    if token.is_empty() {
        return Ok(None);
    }
    let key = keys::daemon_by_token(token);
    if let Some(daemon) = state.cache.get_json::<DaemonDoc>(&key).await? {
        return Ok(Some(daemon));
    }

    let daemon = state.repos.daemons.find_by_token(token).await?.into_iter().next();
    if let Some(daemon) = &daemon {
        state.cache.set_json(&key, daemon).await?;
    }
    Ok(daemon)
}

/// Daemon record id the client is bound to, if any
pub(crate) async fn bound_daemon(state: &AppState, client: ClientId) -> Option<ObjectId> {
    let registry = state.registry.lock().await;
    let daemon = registry.daemon_of(client)?;
    ObjectId::parse_str(&daemon.id).ok()
}

/// Close every session bound to a daemon record
pub(crate) async fn disconnect_daemon(state: &AppState, daemon_id: ObjectId) -> usize {
    state
        .registry
        .lock()
        .await
        .disconnect_daemon(&daemon_id.to_hex())
        .len()
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared setup for handler tests

    use async_trait::async_trait;
    use bson::oid::ObjectId;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::{Notify, Semaphore};

    use crate::cache::{MemoryCache, TokenCache};
    use crate::db::schemas::{DaemonDoc, UserDoc};
    use crate::db::{MemoryTable, Repositories, UserRepository};
    use crate::mail::MemoryMailer;
    use crate::protocol::Outbound;
    use crate::registry::{ClientHandle, ClientId};
    use crate::server::{AppState, Settings};
    use crate::tokens::generate_token;
    use crate::types::{Result, TrackerError};

    pub struct Fixture {
        pub state: AppState,
        pub mailer: Arc<MemoryMailer>,
    }

    pub fn fixture() -> Fixture {
        fixture_with(Repositories::memory())
    }

    /// Memory repositories except for `users`
    pub fn fixture_with_users(users: Arc<dyn UserRepository>) -> Fixture {
        fixture_with(Repositories {
            users,
            ..Repositories::memory()
        })
    }

    fn fixture_with(repos: Repositories) -> Fixture {
        let mailer = Arc::new(MemoryMailer::new());
        let settings = Settings::default();
        let cache = TokenCache::local(Arc::new(MemoryCache::new(settings.cache_ttl)));
        let state = AppState::new(settings, repos, cache, mailer.clone());
        Fixture { state, mailer }
    }

    /// In-memory users whose `find` can be held at a gate and whose email
    /// lookup can be made to fail
    #[derive(Default)]
    pub struct ScriptedUsers {
        inner: MemoryTable<UserDoc>,
        gate: Option<Semaphore>,
        /// Notified each time `find` reaches the gate
        pub entered: Notify,
        fail_email_lookup: bool,
    }

    impl ScriptedUsers {
        pub fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Default::default()
            }
        }

        pub fn broken() -> Self {
            Self {
                fail_email_lookup: true,
                ..Default::default()
            }
        }

        /// Let one parked `find` continue
        pub fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(1);
            }
        }
    }

    #[async_trait]
    impl UserRepository for ScriptedUsers {
        async fn find(&self, id: ObjectId) -> Result<Vec<UserDoc>> {
            if let Some(gate) = &self.gate {
                self.entered.notify_one();
                gate.acquire()
                    .await
                    .map_err(|e| TrackerError::Internal(e.to_string()))?
                    .forget();
            }
            UserRepository::find(&self.inner, id).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Vec<UserDoc>> {
            if self.fail_email_lookup {
                return Err(TrackerError::Database("connection reset".into()));
            }
            UserRepository::find_by_email(&self.inner, email).await
        }

        async fn find_by_token(&self, token: &str) -> Result<Vec<UserDoc>> {
            UserRepository::find_by_token(&self.inner, token).await
        }

        async fn find_by_confirm(&self, confirm: &str) -> Result<Vec<UserDoc>> {
            UserRepository::find_by_confirm(&self.inner, confirm).await
        }

        async fn save(&self, user: UserDoc) -> Result<ObjectId> {
            UserRepository::save(&self.inner, user).await
        }

        async fn delete(&self, id: ObjectId) -> Result<u64> {
            UserRepository::delete(&self.inner, id).await
        }
    }

    impl Fixture {
        pub async fn connect(&self) -> (ClientId, UnboundedReceiver<Outbound>) {
            let id = ClientId::next();
            let (handle, rx) = ClientHandle::channel();
            self.state.registry.lock().await.add_client(id, handle, None);
            (id, rx)
        }

        /// Confirmed user, returned with its master token
        pub async fn user(&self, email: &str) -> UserDoc {
            let mut user = UserDoc::new(email, generate_token());
            user.confirm = None;
            user.token = Some(generate_token());
            let id = self.state.repos.users.save(user.clone()).await.unwrap();
            user._id = Some(id);
            user
        }

        pub async fn daemon(&self, user: &UserDoc, name: &str) -> DaemonDoc {
            let mut daemon = DaemonDoc::new(user._id.unwrap(), name, generate_token());
            let id = self.state.repos.daemons.save(daemon.clone()).await.unwrap();
            daemon._id = Some(id);
            daemon
        }

        /// Bind a connected client to a daemon record directly
        pub async fn bind(&self, client: ClientId, user: &UserDoc, daemon: &DaemonDoc) {
            let mut registry = self.state.registry.lock().await;
            registry.bind_daemon(
                client,
                &daemon._id.unwrap().to_hex(),
                &daemon.name,
                &user._id.unwrap().to_hex(),
                &user.email,
            );
        }
    }
}
