//! Daemon document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{Identified, IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const DAEMON_COLLECTION: &str = "daemons";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DaemonDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user
    pub user_id: ObjectId,

    /// Unique per user
    pub name: String,

    /// Presented by REGISTER_DAEMON_REQUEST
    pub token: String,
}

impl DaemonDoc {
    pub fn new(user_id: ObjectId, name: &str, token: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            name: name.to_string(),
            token,
        }
    }
}

impl IntoIndexes for DaemonDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "user_id": 1, "name": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_name_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "token": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("token_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for DaemonDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl Identified for DaemonDoc {
    fn id(&self) -> Option<ObjectId> {
        self._id
    }

    fn set_id(&mut self, id: ObjectId) {
        self._id = Some(id);
    }
}
