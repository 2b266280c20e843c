//! Shard manager
//!
//! Entries are partitioned into shards keyed by the first
//! [`SHARD_PREFIX_LEN`] characters of their id, so reading one entry never
//! loads the whole history. The shard index lists every prefix whose shard
//! is currently persisted.
//!
//! Invariants kept at rest:
//! - an id lives only in the shard named by its own prefix
//! - a shard key exists iff the shard is non-empty iff its prefix is indexed

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::future::try_join_all;
use tracing::debug;

use crate::models::{Entry, EntryId};
use crate::storage::kv::{self, KvStore};
use crate::storage::{StorageError, StorageResult};

/// Storage key prefix for a shard; the id prefix is appended
pub const SHARD_KEY_PREFIX: &str = "entryBucketV1:";
/// Storage key of the shard index
pub const SHARD_INDEX_KEY: &str = "entryBucketIndexV1";
/// Number of id characters that select a shard
pub const SHARD_PREFIX_LEN: usize = 8;

/// Entries of one shard, keyed by id string
pub type Shard = BTreeMap<String, Entry>;

/// Prefix naming the shard that holds `id`
pub fn shard_prefix(id: &EntryId) -> String {
    id.to_string().chars().take(SHARD_PREFIX_LEN).collect()
}

/// Storage key of the shard with the given prefix
pub fn shard_key(prefix: &str) -> String {
    format!("{}{}", SHARD_KEY_PREFIX, prefix)
}

/// Index state carried across one or more persist calls
///
/// Lets several batches share a single index write.
#[derive(Debug, Default)]
pub struct PersistBatch {
    index: BTreeSet<String>,
    index_changed: bool,
}

impl PersistBatch {
    /// Prefixes indexed as of this batch
    pub fn index(&self) -> &BTreeSet<String> {
        &self.index
    }
}

/// Reads and writes shard records and the shard index
#[derive(Clone)]
pub struct ShardManager {
    kv: Arc<dyn KvStore>,
}

impl ShardManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Read a shard (empty if not persisted)
    pub async fn read_shard(&self, prefix: &str) -> StorageResult<Shard> {
        Ok(kv::read(self.kv.as_ref(), &shard_key(prefix))
            .await?
            .unwrap_or_default())
    }

    /// Write a shard, removing its key when empty
    ///
    /// Does not touch the index; use [`ShardManager::persist`] for that.
    pub async fn write_shard(&self, prefix: &str, shard: &Shard) -> StorageResult<()> {
        let key = shard_key(prefix);
        if shard.is_empty() {
            self.kv.remove(&key).await
        } else {
            kv::write(self.kv.as_ref(), &key, shard).await
        }
    }

    /// Read the set of persisted prefixes
    pub async fn read_index(&self) -> StorageResult<BTreeSet<String>> {
        let prefixes: Option<Vec<String>> = kv::read(self.kv.as_ref(), SHARD_INDEX_KEY).await?;
        Ok(prefixes.unwrap_or_default().into_iter().collect())
    }

    /// Write the index, removing its key when empty
    pub async fn write_index(&self, index: &BTreeSet<String>) -> StorageResult<()> {
        if index.is_empty() {
            return self.kv.remove(SHARD_INDEX_KEY).await;
        }
        let prefixes: Vec<&String> = index.iter().collect();
        kv::write(self.kv.as_ref(), SHARD_INDEX_KEY, &prefixes).await
    }

    /// Start a batch from the currently persisted index
    pub async fn begin(&self) -> StorageResult<PersistBatch> {
        Ok(PersistBatch {
            index: self.read_index().await?,
            index_changed: false,
        })
    }

    /// Persist shards into an open batch without writing the index
    pub async fn persist_into(
        &self,
        batch: &mut PersistBatch,
        updates: BTreeMap<String, Shard>,
    ) -> StorageResult<()> {
        for (prefix, shard) in updates {
            self.write_shard(&prefix, &shard).await?;

            if shard.is_empty() {
                if batch.index.remove(&prefix) {
                    batch.index_changed = true;
                }
            } else if batch.index.insert(prefix) {
                batch.index_changed = true;
            }
        }
        Ok(())
    }

    /// Write the index if any batch step changed it
    pub async fn flush(&self, batch: PersistBatch) -> StorageResult<()> {
        if batch.index_changed {
            debug!(shards = batch.index.len(), "Writing shard index");
            self.write_index(&batch.index).await?;
        }
        Ok(())
    }

    /// Persist a set of shards with at most one index write
    pub async fn persist(&self, updates: BTreeMap<String, Shard>) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut batch = self.begin().await?;
        self.persist_into(&mut batch, updates).await?;
        self.flush(batch).await
    }

    /// Persist a single shard
    pub async fn persist_one(&self, prefix: String, shard: Shard) -> StorageResult<()> {
        self.persist(BTreeMap::from([(prefix, shard)])).await
    }

    /// Remove ids from their shards, returning the ids that were present
    pub async fn remove_ids(&self, ids: &[EntryId]) -> StorageResult<Vec<EntryId>> {
        let unique: BTreeSet<&EntryId> = ids.iter().collect();
        let mut cache: BTreeMap<String, Shard> = BTreeMap::new();
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let mut removed = Vec::new();

        for id in unique {
            let prefix = shard_prefix(id);
            if !cache.contains_key(&prefix) {
                let shard = self.read_shard(&prefix).await?;
                cache.insert(prefix.clone(), shard);
            }
            if let Some(shard) = cache.get_mut(&prefix) {
                if shard.remove(&id.to_string()).is_some() {
                    touched.insert(prefix);
                    removed.push(id.clone());
                }
            }
        }

        let updates: BTreeMap<String, Shard> = cache
            .into_iter()
            .filter(|(prefix, _)| touched.contains(prefix))
            .collect();
        debug!(removed = removed.len(), shards = updates.len(), "Removing entries from shards");
        self.persist(updates).await?;

        Ok(removed)
    }

    /// Look up a single entry
    pub async fn get(&self, id: &EntryId) -> StorageResult<Option<Entry>> {
        let mut shard = self.read_shard(&shard_prefix(id)).await?;
        Ok(shard.remove(&id.to_string()))
    }

    /// Check whether an entry is stored
    pub async fn contains(&self, id: &EntryId) -> StorageResult<bool> {
        let shard = self.read_shard(&shard_prefix(id)).await?;
        Ok(shard.contains_key(&id.to_string()))
    }

    /// Materialize entries in the given order
    ///
    /// Each distinct shard is read once. Ids with no stored entry are skipped.
    pub async fn entries_by_order(&self, order: &[EntryId]) -> StorageResult<Vec<Entry>> {
        if order.is_empty() {
            return Ok(Vec::new());
        }

        let prefixes: BTreeSet<String> = order.iter().map(shard_prefix).collect();
        let shards = try_join_all(prefixes.into_iter().map(|prefix| async move {
            let shard = self.read_shard(&prefix).await?;
            Ok::<_, StorageError>((prefix, shard))
        }))
        .await?;
        let shards: BTreeMap<String, Shard> = shards.into_iter().collect();

        let entries = order
            .iter()
            .filter_map(|id| {
                shards
                    .get(&shard_prefix(id))
                    .and_then(|shard| shard.get(&id.to_string()))
                    .cloned()
            })
            .collect();

        Ok(entries)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryKv;
    use serde_json::json;

    fn manager() -> (Arc<MemoryKv>, ShardManager) {
        let kv = Arc::new(MemoryKv::new());
        (kv.clone(), ShardManager::new(kv))
    }

    fn shard_of(entries: &[&Entry]) -> Shard {
        entries
            .iter()
            .map(|e| (e.id.to_string(), (*e).clone()))
            .collect()
    }

    /// Assert the at-rest shard/index invariant directly on the raw keys
    pub(crate) async fn assert_shard_invariant(kv: &dyn KvStore) {
        let index: BTreeSet<String> = kv::read::<Vec<String>>(kv, SHARD_INDEX_KEY)
            .await
            .unwrap()
            .unwrap_or_default()
            .into_iter()
            .collect();

        let mut persisted = BTreeSet::new();
        for key in kv.keys().await.unwrap() {
            if let Some(prefix) = key.strip_prefix(SHARD_KEY_PREFIX) {
                let shard: Shard = kv::read(kv, &key).await.unwrap().unwrap();
                assert!(!shard.is_empty(), "empty shard persisted under {}", key);
                for id in shard.keys() {
                    assert!(id.starts_with(prefix), "{} stored in shard {}", id, prefix);
                }
                persisted.insert(prefix.to_string());
            }
        }

        assert_eq!(persisted, index);
    }

    #[test]
    fn test_shard_prefix_uses_first_eight_chars() {
        let id = EntryId::for_content("a");
        assert_eq!(shard_prefix(&id), "ca978112");
        assert_eq!(shard_key("ca978112"), "entryBucketV1:ca978112");
    }

    #[tokio::test]
    async fn test_persist_indexes_non_empty_shards() {
        let (kv, shards) = manager();
        let a = Entry::new("a", 1);
        let b = Entry::new("b", 2);

        let mut updates = BTreeMap::new();
        updates.insert(shard_prefix(&a.id), shard_of(&[&a]));
        updates.insert(shard_prefix(&b.id), shard_of(&[&b]));
        shards.persist(updates).await.unwrap();

        let index = shards.read_index().await.unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains(&shard_prefix(&a.id)));
        assert_shard_invariant(kv.as_ref()).await;
    }

    #[tokio::test]
    async fn test_persist_empty_shard_drops_key_and_index() {
        let (kv, shards) = manager();
        let a = Entry::new("a", 1);
        let prefix = shard_prefix(&a.id);

        shards
            .persist_one(prefix.clone(), shard_of(&[&a]))
            .await
            .unwrap();
        shards.persist_one(prefix.clone(), Shard::new()).await.unwrap();

        assert!(kv.get(&shard_key(&prefix)).await.unwrap().is_none());
        // Empty index is stored as an absent key
        assert!(kv.get(SHARD_INDEX_KEY).await.unwrap().is_none());
        assert_shard_invariant(kv.as_ref()).await;
    }

    #[tokio::test]
    async fn test_index_written_once_per_batch() {
        let (kv, shards) = manager();
        let mut rx = kv.subscribe();

        let entries: Vec<Entry> = ["a", "b", "c"].iter().map(|c| Entry::new(*c, 1)).collect();
        let updates: BTreeMap<String, Shard> = entries
            .iter()
            .map(|e| (shard_prefix(&e.id), shard_of(&[e])))
            .collect();
        shards.persist(updates).await.unwrap();

        let mut index_writes = 0;
        while let Ok(change) = rx.try_recv() {
            if change.key == SHARD_INDEX_KEY {
                index_writes += 1;
            }
        }
        assert_eq!(index_writes, 1);
    }

    #[tokio::test]
    async fn test_unchanged_index_is_not_rewritten() {
        let (kv, shards) = manager();
        let a = Entry::new("a", 1);
        let prefix = shard_prefix(&a.id);
        shards
            .persist_one(prefix.clone(), shard_of(&[&a]))
            .await
            .unwrap();

        let mut rx = kv.subscribe();
        let mut recopied = a.clone();
        recopied.copied_at = Some(5);
        shards
            .persist_one(prefix, shard_of(&[&recopied]))
            .await
            .unwrap();

        let keys: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|c| c.key)
            .collect();
        assert_eq!(keys, vec![shard_key(&shard_prefix(&a.id))]);
    }

    #[tokio::test]
    async fn test_remove_ids_reports_present_ids() {
        let (kv, shards) = manager();
        let a = Entry::new("a", 1);
        let b = Entry::new("b", 1);
        shards
            .persist(BTreeMap::from([
                (shard_prefix(&a.id), shard_of(&[&a])),
                (shard_prefix(&b.id), shard_of(&[&b])),
            ]))
            .await
            .unwrap();

        let missing = EntryId::for_content("zzz");
        let removed = shards
            .remove_ids(&[a.id.clone(), missing, a.id.clone()])
            .await
            .unwrap();

        assert_eq!(removed, vec![a.id.clone()]);
        assert!(!shards.contains(&a.id).await.unwrap());
        assert!(shards.contains(&b.id).await.unwrap());
        assert_shard_invariant(kv.as_ref()).await;
    }

    #[tokio::test]
    async fn test_entries_by_order_skips_missing_ids() {
        let (_kv, shards) = manager();
        let a = Entry::new("a", 1);
        let b = Entry::new("b", 2);
        shards
            .persist(BTreeMap::from([
                (shard_prefix(&a.id), shard_of(&[&a])),
                (shard_prefix(&b.id), shard_of(&[&b])),
            ]))
            .await
            .unwrap();

        let ghost = EntryId::for_content("ghost");
        let entries = shards
            .entries_by_order(&[b.id.clone(), ghost, a.id.clone()])
            .await
            .unwrap();

        assert_eq!(entries, vec![b, a]);
    }

    #[tokio::test]
    async fn test_read_shard_of_legacy_json() {
        let (kv, shards) = manager();
        kv.set(
            &shard_key("ca978112"),
            json!({
                "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb": {
                    "id": "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb",
                    "createdAt": 1,
                    "copiedAt": 2,
                    "content": "a"
                }
            }),
        )
        .await
        .unwrap();

        let shard = shards.read_shard("ca978112").await.unwrap();
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.values().next().unwrap().copied_at, Some(2));
        assert!(shards.contains(&EntryId::for_content("a")).await.unwrap());
    }
}
