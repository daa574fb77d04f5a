//! User document schema
//!
//! A user is created unconfirmed by INIT with a pending `confirm` token.
//! Confirming replaces it with the master `token`.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{Identified, IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UserDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Lowercased account email
    pub email: String,

    /// Master token, set once the account is confirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Pending confirmation token sent by mail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<String>,
}

impl UserDoc {
    pub fn new(email: &str, confirm: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            email: email.to_lowercase(),
            token: None,
            confirm: Some(confirm),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.token.is_some()
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("email_unique".to_string())
                        .build(),
                ),
            ),
            // Tokens are absent on unconfirmed accounts
            (
                doc! { "token": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .sparse(true)
                        .name("token_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "confirm": 1 },
                Some(
                    IndexOptions::builder()
                        .sparse(true)
                        .name("confirm_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl Identified for UserDoc {
    fn id(&self) -> Option<ObjectId> {
        self._id
    }

    fn set_id(&mut self, id: ObjectId) {
        self._id = Some(id);
    }
}
