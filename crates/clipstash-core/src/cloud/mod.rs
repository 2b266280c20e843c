//! Remote entry collection
//!
//! Signed-in, subscribed users can keep entries in a cloud database. The
//! store only needs a narrow slice of it: filtered queries over the entries
//! collection, a subscriptions query, and a transaction of create, update,
//! delete and link operations.
//!
//! Cloud records are owned by a user and deduplicated per user through
//! `emailContentHash` (`"<email>+<sha256(content)>"`).

mod memory;

pub use memory::{MemoryCloud, OfflineCloud};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from the cloud database
#[derive(Error, Debug)]
pub enum CloudError {
    /// No live connection to the database
    #[error("Cloud database is not connected")]
    Disconnected,

    /// The operation needs a signed-in user
    #[error("Not signed in")]
    NotSignedIn,

    /// A transaction referenced a record that does not exist
    #[error("Cloud entry not found: {0}")]
    NotFound(Uuid),

    /// The database rejected the request
    #[error("Cloud request failed: {0}")]
    Request(String),

    /// Internal lock poisoned
    #[error("Cloud state lock poisoned")]
    Poisoned,
}

impl<T> From<std::sync::PoisonError<T>> for CloudError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        CloudError::Poisoned
    }
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Per-user dedup key of a cloud record
pub fn email_content_hash(email: &str, content_hash: &str) -> String {
    format!("{}+{}", email, content_hash)
}

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudUser {
    pub email: String,
}

/// State of the database connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Opened,
    Authenticated,
    /// Connection shut down; the cloud path is skipped
    Closed,
    Errored,
}

/// An active subscription of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
}

/// An entry record in the cloud collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudEntry {
    pub id: Uuid,
    pub content: String,
    pub created_at: i64,
    #[serde(default)]
    pub copied_at: Option<i64>,
    #[serde(default)]
    pub is_favorited: Option<bool>,
    /// JSON-encoded list of tag strings
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub email_content_hash: Option<String>,
    /// Email of the linked user
    #[serde(default)]
    pub owner: Option<String>,
}

impl CloudEntry {
    /// Decoded tags; anything that is not a JSON string list reads as empty
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Queryable fields of a cloud entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryField {
    Id,
    Content,
    EmailContentHash,
}

/// Equality (or null) match on one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFilter {
    pub field: EntryField,
    pub value: Option<String>,
}

impl EntryFilter {
    pub fn eq(field: EntryField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: Some(value.into()),
        }
    }

    pub fn is_null(field: EntryField) -> Self {
        Self { field, value: None }
    }

    pub fn matches(&self, entry: &CloudEntry) -> bool {
        let actual = match self.field {
            EntryField::Id => Some(entry.id.hyphenated().to_string()),
            EntryField::Content => Some(entry.content.clone()),
            EntryField::EmailContentHash => entry.email_content_hash.clone(),
        };
        actual == self.value
    }
}

/// Fields to set on a record; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPatch {
    pub created_at: Option<i64>,
    pub copied_at: Option<i64>,
    pub content: Option<String>,
    pub is_favorited: Option<bool>,
    pub tags: Option<String>,
    pub email_content_hash: Option<String>,
}

impl EntryPatch {
    pub fn apply(&self, entry: &mut CloudEntry) {
        if let Some(created_at) = self.created_at {
            entry.created_at = created_at;
        }
        if let Some(copied_at) = self.copied_at {
            entry.copied_at = Some(copied_at);
        }
        if let Some(content) = &self.content {
            entry.content = content.clone();
        }
        if let Some(is_favorited) = self.is_favorited {
            entry.is_favorited = Some(is_favorited);
        }
        if let Some(tags) = &self.tags {
            entry.tags = Some(tags.clone());
        }
        if let Some(hash) = &self.email_content_hash {
            entry.email_content_hash = Some(hash.clone());
        }
    }
}

/// One operation inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum CloudOp {
    /// Update the record with this `emailContentHash`, creating it if
    /// missing, and link it to `owner`
    UpsertByLookup {
        email_content_hash: String,
        patch: EntryPatch,
        owner: Option<String>,
    },
    /// Update an existing record
    UpdateById { id: Uuid, patch: EntryPatch },
    /// Delete a record (missing records are ignored)
    DeleteById(Uuid),
}

/// Cloud database client
#[async_trait]
pub trait CloudDb: Send + Sync {
    /// The signed-in user, if any
    async fn auth(&self) -> CloudResult<Option<CloudUser>>;

    fn connection_status(&self) -> ConnectionStatus;

    async fn query_entries(&self, filter: &EntryFilter) -> CloudResult<Vec<CloudEntry>>;

    async fn query_subscriptions(&self) -> CloudResult<Vec<Subscription>>;

    /// Apply all operations or none
    async fn transact(&self, ops: Vec<CloudOp>) -> CloudResult<()>;
}
