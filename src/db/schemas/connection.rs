//! Connection document schema
//!
//! One connection is published per path, named `<owner email>?<path>`, with
//! at most one serving daemon and any number of client daemons.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{Identified, IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::protocol::ActingAs;

pub const CONNECTION_COLLECTION: &str = "connections";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ConnectionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub user_id: ObjectId,
    pub path_id: ObjectId,

    /// `<owner email>?<path>`
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_daemon_id: Option<ObjectId>,

    #[serde(default)]
    pub client_daemon_ids: Vec<ObjectId>,

    #[serde(default)]
    pub connect_address: String,
    #[serde(default)]
    pub connect_port: u16,
    #[serde(default)]
    pub listen_address: String,
    #[serde(default)]
    pub listen_port: u16,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub fixed: bool,
}

impl ConnectionDoc {
    /// Role `daemon_id` plays on this connection, if attached
    pub fn role_of(&self, daemon_id: ObjectId) -> Option<ActingAs> {
        if self.server_daemon_id == Some(daemon_id) {
            Some(ActingAs::Server)
        } else if self.client_daemon_ids.contains(&daemon_id) {
            Some(ActingAs::Client)
        } else {
            None
        }
    }

    /// Detach a daemon from whatever role it has; false if it had none
    pub fn detach(&mut self, daemon_id: ObjectId) -> bool {
        let mut changed = false;
        if self.server_daemon_id == Some(daemon_id) {
            self.server_daemon_id = None;
            changed = true;
        }
        let before = self.client_daemon_ids.len();
        self.client_daemon_ids.retain(|id| *id != daemon_id);
        changed || before != self.client_daemon_ids.len()
    }
}

impl IntoIndexes for ConnectionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "name": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("name_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "path_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("path_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "server_daemon_id": 1 },
                Some(
                    IndexOptions::builder()
                        .sparse(true)
                        .name("server_daemon_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "client_daemon_ids": 1 },
                Some(
                    IndexOptions::builder()
                        .name("client_daemons_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ConnectionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl Identified for ConnectionDoc {
    fn id(&self) -> Option<ObjectId> {
        self._id
    }

    fn set_id(&mut self, id: ObjectId) {
        self._id = Some(id);
    }
}
