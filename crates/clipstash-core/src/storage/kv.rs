//! Key-value primitive
//!
//! The entry store only needs an unordered async map from string keys to
//! structured JSON values, plus a way to hear about changes. Backends make
//! no multi-key atomicity promises.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::error::{StorageError, StorageResult};

/// Capacity of the change channel before slow watchers start lagging
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Notification that a key was written or removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvChange {
    pub key: String,
}

/// Async key-value storage area
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` if the key is absent
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Remove a key (no-op if absent)
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// List all keys currently stored
    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Subscribe to key changes
    fn subscribe(&self) -> broadcast::Receiver<KvChange>;
}

/// Read and deserialize a value
pub async fn read<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> StorageResult<Option<T>> {
    match kv.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::invalid_value(key, e)),
        None => Ok(None),
    }
}

/// Serialize and write a value
pub async fn write<T: Serialize + ?Sized>(
    kv: &dyn KvStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let value = serde_json::to_value(value).map_err(|e| StorageError::invalid_value(key, e))?;
    kv.set(key, value).await
}

/// In-process backend
///
/// Holds everything in a map. Used for tests and for hosts that provide
/// their own durability.
pub struct MemoryKv {
    values: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<KvChange>,
}

impl MemoryKv {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn notify(&self, key: &str) {
        // No receivers is fine
        let _ = self.changes.send(KvChange {
            key: key.to_string(),
        });
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.values.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.values.lock()?.insert(key.to_string(), value);
        self.notify(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let removed = self.values.lock()?.remove(key).is_some();
        if removed {
            self.notify(key);
        }
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self.values.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}
