//! Path document schema
//!
//! Paths form a per-user tree (`/office`, `/office/printer`). The path token
//! lets another user's daemon attach to the connection published under it.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{Identified, IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const PATH_COLLECTION: &str = "paths";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PathDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub user_id: ObjectId,

    /// Absolute, e.g. `/office/printer`
    pub path: String,

    pub token: String,
}

impl PathDoc {
    pub fn new(user_id: ObjectId, path: &str, token: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            path: path.to_string(),
            token,
        }
    }
}

impl IntoIndexes for PathDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "user_id": 1, "path": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_path_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "token": 1 },
                Some(
                    IndexOptions::builder()
                        .name("token_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for PathDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl Identified for PathDoc {
    fn id(&self) -> Option<ObjectId> {
        self._id
    }

    fn set_id(&mut self, id: ObjectId) {
        self._id = Some(id);
    }
}
