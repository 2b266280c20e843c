//! Legacy flat-list migration
//!
//! Older versions kept every entry in a single array under
//! [`LEGACY_ENTRIES_KEY`]. The first entry operation on a store moves that
//! array into shards and an order, then removes the key.
//!
//! The run is memoized per [`Migration`] as a shared future: concurrent
//! callers all await the same execution, and later callers get its stored
//! result (including a failure) without touching storage again.

use std::sync::{Arc, OnceLock};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tracing::{info, warn};

use crate::local::LocalEntries;
use crate::models::Entry;
use crate::storage::{KvStore, StorageError, StorageResult};

/// Storage key of the legacy flat entry array
pub const LEGACY_ENTRIES_KEY: &str = "entryIdSetentries";

/// What a migration run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationReport {
    /// No legacy data was stored
    NothingToMigrate,
    /// Legacy data could not be parsed and was removed
    DiscardedCorrupt,
    /// This many legacy entries were written as a snapshot
    Migrated(usize),
}

/// Shared result of a migration run
pub type MigrationResult = Result<MigrationReport, Arc<StorageError>>;

type MigrationFuture = Shared<BoxFuture<'static, MigrationResult>>;

/// Per-store migration gate
pub struct Migration {
    kv: Arc<dyn KvStore>,
    local: LocalEntries,
    run: OnceLock<MigrationFuture>,
}

impl Migration {
    pub fn new(kv: Arc<dyn KvStore>, local: LocalEntries) -> Self {
        Self {
            kv,
            local,
            run: OnceLock::new(),
        }
    }

    /// Start the migration if needed and wait for it to finish
    pub async fn ensure(&self) -> MigrationResult {
        let run = self
            .run
            .get_or_init(|| {
                let kv = self.kv.clone();
                let local = self.local.clone();
                async move { run_migration(kv, local).await.map_err(Arc::new) }
                    .boxed()
                    .shared()
            })
            .clone();
        run.await
    }

    /// Whether the migration has been triggered on this instance
    pub fn started(&self) -> bool {
        self.run.get().is_some()
    }
}

async fn run_migration(kv: Arc<dyn KvStore>, local: LocalEntries) -> StorageResult<MigrationReport> {
    let Some(raw) = kv.get(LEGACY_ENTRIES_KEY).await? else {
        return Ok(MigrationReport::NothingToMigrate);
    };

    match serde_json::from_value::<Vec<Entry>>(raw) {
        Ok(entries) => {
            let count = entries.len();
            migrate_legacy(kv.as_ref(), &local, &entries).await?;
            if count > 0 {
                info!(entries = count, "Migrated legacy entries");
            }
            Ok(MigrationReport::Migrated(count))
        }
        Err(e) => {
            warn!(error = %e, "Discarding unreadable legacy entries");
            kv.remove(LEGACY_ENTRIES_KEY).await?;
            Ok(MigrationReport::DiscardedCorrupt)
        }
    }
}

/// Write legacy entries as a snapshot and drop the legacy key
///
/// Does not go through the migration gate.
pub(crate) async fn migrate_legacy(
    kv: &dyn KvStore,
    local: &LocalEntries,
    entries: &[Entry],
) -> StorageResult<()> {
    if !entries.is_empty() {
        local.write_snapshot(entries).await?;
    }
    kv.remove(LEGACY_ENTRIES_KEY).await
}

/// Parse legacy entries if the key is present and readable
pub(crate) async fn read_legacy(kv: &dyn KvStore) -> StorageResult<Option<Vec<Entry>>> {
    let Some(raw) = kv.get(LEGACY_ENTRIES_KEY).await? else {
        return Ok(None);
    };
    match serde_json::from_value(raw) {
        Ok(entries) => Ok(Some(entries)),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable legacy entries");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badge::LogBadge;
    use crate::order::ORDER_KEY;
    use crate::shards::tests::assert_shard_invariant;
    use crate::storage::{KvChange, MemoryKv};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    /// Counts legacy-key traffic and yields on every call
    struct CountingKv {
        inner: MemoryKv,
        legacy_reads: AtomicUsize,
        legacy_removes: AtomicUsize,
    }

    impl CountingKv {
        fn new() -> Self {
            Self {
                inner: MemoryKv::new(),
                legacy_reads: AtomicUsize::new(0),
                legacy_removes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KvStore for CountingKv {
        async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
            if key == LEGACY_ENTRIES_KEY {
                self.legacy_reads.fetch_add(1, Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
            tokio::task::yield_now().await;
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> StorageResult<()> {
            if key == LEGACY_ENTRIES_KEY {
                self.legacy_removes.fetch_add(1, Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            self.inner.remove(key).await
        }

        async fn keys(&self) -> StorageResult<Vec<String>> {
            self.inner.keys().await
        }

        fn subscribe(&self) -> broadcast::Receiver<KvChange> {
            self.inner.subscribe()
        }
    }

    fn migration(kv: Arc<dyn KvStore>) -> (LocalEntries, Migration) {
        let local = LocalEntries::new(kv.clone(), Arc::new(LogBadge));
        (local.clone(), Migration::new(kv, local))
    }

    fn legacy_json(entries: &[Entry]) -> Value {
        serde_json::to_value(entries).unwrap()
    }

    #[tokio::test]
    async fn test_nothing_to_migrate() {
        let kv = Arc::new(MemoryKv::new());
        let (_, migration) = migration(kv);

        assert!(!migration.started());
        assert_eq!(
            migration.ensure().await.unwrap(),
            MigrationReport::NothingToMigrate
        );
        assert!(migration.started());
    }

    #[tokio::test]
    async fn test_migrates_legacy_entries_in_order() {
        let kv = Arc::new(MemoryKv::new());
        let entries = vec![Entry::new("a", 1), Entry::new("b", 2), Entry::new("c", 3)];
        kv.set(LEGACY_ENTRIES_KEY, legacy_json(&entries)).await.unwrap();

        let (local, migration) = migration(kv.clone());
        assert_eq!(migration.ensure().await.unwrap(), MigrationReport::Migrated(3));

        assert_eq!(local.read_all().await.unwrap(), entries);
        assert!(kv.get(LEGACY_ENTRIES_KEY).await.unwrap().is_none());
        assert_shard_invariant(kv.as_ref()).await;
    }

    #[tokio::test]
    async fn test_corrupt_legacy_is_discarded() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(LEGACY_ENTRIES_KEY, json!({"not": "a list"}))
            .await
            .unwrap();

        let (local, migration) = migration(kv.clone());
        assert_eq!(
            migration.ensure().await.unwrap(),
            MigrationReport::DiscardedCorrupt
        );
        assert!(kv.get(LEGACY_ENTRIES_KEY).await.unwrap().is_none());
        assert!(local.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_legacy_is_removed_without_writing_order() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(LEGACY_ENTRIES_KEY, json!([])).await.unwrap();

        let (_, migration) = migration(kv.clone());
        assert_eq!(migration.ensure().await.unwrap(), MigrationReport::Migrated(0));
        assert!(kv.get(LEGACY_ENTRIES_KEY).await.unwrap().is_none());
        assert!(kv.get(ORDER_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_once() {
        let kv = Arc::new(CountingKv::new());
        let entries = vec![Entry::new("a", 1), Entry::new("b", 2)];
        kv.inner
            .set(LEGACY_ENTRIES_KEY, legacy_json(&entries))
            .await
            .unwrap();

        let (local, migration) = migration(kv.clone());
        let (r1, r2, r3) = tokio::join!(migration.ensure(), migration.ensure(), migration.ensure());

        assert_eq!(r1.unwrap(), MigrationReport::Migrated(2));
        assert_eq!(r2.unwrap(), MigrationReport::Migrated(2));
        assert_eq!(r3.unwrap(), MigrationReport::Migrated(2));
        assert_eq!(kv.legacy_reads.load(Ordering::SeqCst), 1);
        assert_eq!(kv.legacy_removes.load(Ordering::SeqCst), 1);

        // Later calls reuse the memoized result
        migration.ensure().await.unwrap();
        assert_eq!(kv.legacy_reads.load(Ordering::SeqCst), 1);
        assert_eq!(local.read_all().await.unwrap(), entries);
    }

    #[tokio::test]
    async fn test_read_legacy_ignores_garbage() {
        let kv = MemoryKv::new();
        assert!(read_legacy(&kv).await.unwrap().is_none());

        kv.set(LEGACY_ENTRIES_KEY, json!("garbage")).await.unwrap();
        assert!(read_legacy(&kv).await.unwrap().is_none());

        kv.set(LEGACY_ENTRIES_KEY, legacy_json(&[Entry::new("a", 1)]))
            .await
            .unwrap();
        assert_eq!(read_legacy(&kv).await.unwrap().map(|e| e.len()), Some(1));
    }
}
