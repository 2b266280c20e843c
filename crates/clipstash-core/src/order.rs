//! Order index and version beacon
//!
//! The order is the authoritative sequence of entry ids, oldest first and
//! most recently copied last. It is independent of how entries are sharded.
//!
//! The version beacon is a single token rewritten after every committed
//! change. Watchers compare tokens to learn that *something* changed; the
//! token carries no information about what.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::models::{now_millis, EntryId};
use crate::storage::kv::{self, KvStore};
use crate::storage::StorageResult;

/// Storage key of the order sequence
pub const ORDER_KEY: &str = "entryOrderV1";
/// Storage key of the version token
pub const VERSION_KEY: &str = "entryVersionV1";

/// Remove duplicate ids, keeping the first occurrence of each
pub fn dedup(order: &[EntryId]) -> Vec<EntryId> {
    let mut seen = HashSet::with_capacity(order.len());
    order
        .iter()
        .filter(|id| seen.insert(*id))
        .cloned()
        .collect()
}

/// Reads and writes the entry order
#[derive(Clone)]
pub struct OrderIndex {
    kv: Arc<dyn KvStore>,
}

impl OrderIndex {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Current order (empty if none stored)
    pub async fn read(&self) -> StorageResult<Vec<EntryId>> {
        let order: Option<Vec<EntryId>> = kv::read(self.kv.as_ref(), ORDER_KEY).await?;
        Ok(order.unwrap_or_default())
    }

    /// Write a deduplicated order and return what was stored
    ///
    /// An empty order removes the key.
    pub async fn write(&self, order: &[EntryId]) -> StorageResult<Vec<EntryId>> {
        let deduped = dedup(order);

        if deduped.is_empty() {
            self.kv.remove(ORDER_KEY).await?;
        } else {
            kv::write(self.kv.as_ref(), ORDER_KEY, &deduped).await?;
        }

        debug!(len = deduped.len(), "Wrote entry order");
        Ok(deduped)
    }
}

/// Change-notification token
#[derive(Clone)]
pub struct VersionBeacon {
    kv: Arc<dyn KvStore>,
}

impl VersionBeacon {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Current token, if any change has been committed
    pub async fn current(&self) -> StorageResult<Option<String>> {
        kv::read(self.kv.as_ref(), VERSION_KEY).await
    }

    /// Store a fresh token and return it
    pub async fn bump(&self) -> StorageResult<String> {
        let token = format!("{}-{}", now_millis(), Uuid::new_v4().simple());
        kv::write(self.kv.as_ref(), VERSION_KEY, &token).await?;
        Ok(token)
    }
}
