//! Local entry collection
//!
//! Ties the shard manager, the order index and the version beacon together.
//! Everything here bypasses the migration gate; callers above it are
//! responsible for awaiting migration first.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::badge::BadgeNotifier;
use crate::models::{Entry, EntryId};
use crate::order::{OrderIndex, VersionBeacon};
use crate::shards::{shard_prefix, Shard, ShardManager};
use crate::storage::{KvStore, StorageResult};

/// Sharded, ordered view over one storage area
#[derive(Clone)]
pub struct LocalEntries {
    pub(crate) shards: ShardManager,
    pub(crate) order: OrderIndex,
    pub(crate) beacon: VersionBeacon,
    badge: Arc<dyn BadgeNotifier>,
}

impl LocalEntries {
    pub fn new(kv: Arc<dyn KvStore>, badge: Arc<dyn BadgeNotifier>) -> Self {
        Self {
            shards: ShardManager::new(kv.clone()),
            order: OrderIndex::new(kv.clone()),
            beacon: VersionBeacon::new(kv),
            badge,
        }
    }

    /// Announce a committed change: badge first, then a fresh version token
    pub async fn commit(&self, count: usize) -> StorageResult<()> {
        self.badge.update_total_items(count);
        self.beacon.bump().await?;
        Ok(())
    }

    /// All entries in order
    pub async fn read_all(&self) -> StorageResult<Vec<Entry>> {
        let order = self.order.read().await?;
        self.shards.entries_by_order(&order).await
    }

    /// Replace the whole collection with `entries`
    ///
    /// Every shard not named by an incoming entry is emptied, all shards go
    /// out in one batch with a single index write, and the order becomes the
    /// entry ids in sequence.
    pub async fn write_snapshot(&self, entries: &[Entry]) -> StorageResult<Vec<EntryId>> {
        let mut updates: BTreeMap<String, Shard> = BTreeMap::new();
        for entry in entries {
            updates
                .entry(shard_prefix(&entry.id))
                .or_default()
                .insert(entry.id.to_string(), entry.clone());
        }

        let mut batch = self.shards.begin().await?;
        for prefix in batch.index().iter() {
            if !updates.contains_key(prefix) {
                updates.insert(prefix.clone(), Shard::new());
            }
        }
        self.shards.persist_into(&mut batch, updates).await?;
        self.shards.flush(batch).await?;

        let ids: Vec<EntryId> = entries.iter().map(|e| e.id.clone()).collect();
        let order = self.order.write(&ids).await?;
        debug!(entries = order.len(), "Wrote entry snapshot");

        self.commit(order.len()).await?;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badge::LogBadge;
    use crate::shards::tests::assert_shard_invariant;
    use crate::storage::MemoryKv;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local(kv: Arc<MemoryKv>) -> LocalEntries {
        LocalEntries::new(kv, Arc::new(LogBadge))
    }

    #[tokio::test]
    async fn test_snapshot_replaces_previous_contents() {
        let kv = Arc::new(MemoryKv::new());
        let local = local(kv.clone());

        let first: Vec<Entry> = ["a", "b", "c"].iter().map(|c| Entry::new(*c, 1)).collect();
        local.write_snapshot(&first).await.unwrap();

        let second = vec![Entry::new("d", 2), first[1].clone()];
        local.write_snapshot(&second).await.unwrap();

        assert_eq!(local.read_all().await.unwrap(), second);
        assert!(!local.shards.contains(&first[0].id).await.unwrap());
        assert_shard_invariant(kv.as_ref()).await;
    }

    #[tokio::test]
    async fn test_empty_snapshot_clears_everything() {
        let kv = Arc::new(MemoryKv::new());
        let local = local(kv.clone());

        local
            .write_snapshot(&[Entry::new("a", 1), Entry::new("b", 1)])
            .await
            .unwrap();
        local.write_snapshot(&[]).await.unwrap();

        assert!(local.read_all().await.unwrap().is_empty());
        assert!(local.shards.read_index().await.unwrap().is_empty());
        assert_shard_invariant(kv.as_ref()).await;
    }

    #[tokio::test]
    async fn test_snapshot_commits_count_and_version() {
        let kv = Arc::new(MemoryKv::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let local = LocalEntries::new(
            kv,
            Arc::new(move |count: usize| sink.store(count, Ordering::SeqCst)),
        );

        assert!(local.beacon.current().await.unwrap().is_none());
        local
            .write_snapshot(&[Entry::new("a", 1), Entry::new("b", 1)])
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(local.beacon.current().await.unwrap().is_some());
    }
}
