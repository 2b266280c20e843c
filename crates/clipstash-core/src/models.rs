//! Data models for clipstash
//!
//! Defines the clipboard `Entry`, its content-derived `EntryId`, and the
//! outcome types returned by store operations.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of the textual form of a cloud entry id (hyphenated UUID)
pub const CLOUD_ID_LEN: usize = 36;

/// Lowercase hex SHA-256 of the content
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Identity of an entry
///
/// Local entries are addressed by the hash of their content; cloud entries by
/// the record id the remote database assigned. On the wire both are plain
/// strings and are told apart by shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EntryId {
    /// Content hash of a locally stored entry
    Local(String),
    /// Remote record id
    Cloud(Uuid),
}

impl EntryId {
    /// Local id for the given content
    pub fn for_content(content: &str) -> Self {
        EntryId::Local(content_hash(content))
    }

    /// Classify a stored id string
    pub fn parse(raw: &str) -> Self {
        if raw.len() == CLOUD_ID_LEN {
            if let Ok(uuid) = Uuid::parse_str(raw) {
                return EntryId::Cloud(uuid);
            }
        }
        EntryId::Local(raw.to_string())
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, EntryId::Cloud(_))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EntryId::Local(_))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Local(hash) => f.write_str(hash),
            EntryId::Cloud(uuid) => write!(f, "{}", uuid.hyphenated()),
        }
    }
}

impl From<String> for EntryId {
    fn from(raw: String) -> Self {
        EntryId::parse(&raw)
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        match id {
            EntryId::Local(hash) => hash,
            cloud => cloud.to_string(),
        }
    }
}

/// A clipboard item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Content-derived identifier
    pub id: EntryId,
    /// When the content was first copied (epoch ms)
    pub created_at: i64,
    /// When the content was last copied (epoch ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied_at: Option<i64>,
    /// The copied text
    pub content: String,
}

impl Entry {
    /// Create a local entry first copied at `now`
    pub fn new(content: impl Into<String>, now: i64) -> Self {
        let content = content.into();
        Self {
            id: EntryId::for_content(&content),
            created_at: now,
            copied_at: Some(now),
            content,
        }
    }

    /// Same metadata, new content (and therefore a new id)
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: EntryId::for_content(&content),
            created_at: self.created_at,
            copied_at: self.copied_at,
            content,
        }
    }

    /// Most recent copy time, falling back to creation time
    pub fn last_copied(&self) -> i64 {
        self.copied_at.unwrap_or(self.created_at)
    }
}

/// Where a new entry should be stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StorageLocation {
    #[default]
    Local,
    Cloud,
}

impl FromStr for StorageLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(StorageLocation::Local),
            "cloud" => Ok(StorageLocation::Cloud),
            other => Err(format!("unknown storage location '{}'", other)),
        }
    }
}

/// Result of `create_entry`
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// Written to the remote collection
    Cloud,
    /// Content already stored locally; only `copied_at` moved
    Recopied(EntryId),
    /// New local entry, with any ids the item limit evicted
    Created { id: EntryId, evicted: Vec<EntryId> },
}

/// Result of `delete_entries`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteOutcome {
    /// Ids that were removed (or were already absent)
    pub deleted: Vec<EntryId>,
    /// Local favorites that were skipped
    pub protected: Vec<EntryId>,
}

/// Result of `update_entry_content`
#[derive(Debug, Clone, PartialEq)]
pub enum ContentUpdate {
    /// Content replaced; `id` is the entry's id afterwards
    Updated { id: EntryId },
    /// Nothing to update (entry missing or not signed in)
    Unchanged,
    /// Another entry already holds this content
    NotUnique,
}

impl ContentUpdate {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ContentUpdate::NotUnique)
    }
}

/// Result of `toggle_entry_storage_location`
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    /// Cloud record copied into local storage under this id
    MovedToLocal(EntryId),
    /// Local entry copied to the cloud and removed locally
    MovedToCloud,
    /// The destination already holds the same content
    AlreadyPresent,
    /// Source entry does not exist
    NotFound,
    /// Moving to the cloud needs a signed-in user
    NotSignedIn,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_OF_A: &str = "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb";

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(content_hash("a"), HASH_OF_A);
        assert_eq!(content_hash("a").len(), 64);
    }

    #[test]
    fn test_parse_distinguishes_local_and_cloud() {
        let cloud = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
        assert!(EntryId::parse(cloud).is_cloud());
        assert!(EntryId::parse(HASH_OF_A).is_local());

        // 36 chars but not a UUID stays local
        let odd = "x".repeat(36);
        assert_eq!(EntryId::parse(&odd), EntryId::Local(odd.clone()));
    }

    #[test]
    fn test_display_round_trips_through_string() {
        let cloud = EntryId::Cloud(Uuid::new_v4());
        assert_eq!(EntryId::parse(&cloud.to_string()), cloud);

        let local = EntryId::for_content("hello");
        assert_eq!(String::from(local.clone()), content_hash("hello"));
    }

    #[test]
    fn test_entry_serializes_with_legacy_field_names() {
        let entry = Entry::new("a", 1_700_000_000_000);
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["id"], HASH_OF_A);
        assert_eq!(value["createdAt"], 1_700_000_000_000i64);
        assert_eq!(value["copiedAt"], 1_700_000_000_000i64);
        assert_eq!(value["content"], "a");
    }

    #[test]
    fn test_entry_accepts_missing_copied_at() {
        let entry: Entry = serde_json::from_str(&format!(
            r#"{{"id":"{}","createdAt":5,"content":"a"}}"#,
            HASH_OF_A
        ))
        .unwrap();

        assert_eq!(entry.copied_at, None);
        assert_eq!(entry.last_copied(), 5);
    }

    #[test]
    fn test_with_content_keeps_timestamps() {
        let mut entry = Entry::new("old", 10);
        entry.copied_at = Some(20);

        let moved = entry.with_content("new");
        assert_eq!(moved.id, EntryId::for_content("new"));
        assert_eq!(moved.created_at, 10);
        assert_eq!(moved.copied_at, Some(20));
    }

    #[test]
    fn test_storage_location_from_str() {
        assert_eq!("cloud".parse::<StorageLocation>(), Ok(StorageLocation::Cloud));
        assert_eq!("Local".parse::<StorageLocation>(), Ok(StorageLocation::Local));
        assert!("disk".parse::<StorageLocation>().is_err());
    }
}
