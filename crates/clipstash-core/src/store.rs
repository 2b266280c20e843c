//! Entry store
//!
//! The `EntryStore` is the public face of clipstash. It coordinates:
//! - the sharded local collection (shards, order, version token)
//! - the one-time legacy migration
//! - the favorites, tags and commands bindings
//! - the optional cloud collection
//!
//! ## Usage
//!
//! ```ignore
//! let store = EntryStore::open()?;
//!
//! store.create_entry("hello", StorageLocation::Local).await?;
//! let entries = store.get_entries().await?;
//! ```
//!
//! Every entry read and write waits for the legacy migration first. There
//! are no locks around shard read-modify-write sequences: two operations
//! interleaving on the same shard can lose one update.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::badge::{BadgeNotifier, LogBadge};
use crate::bindings::{CommandsStore, FavoritesStore, TagsStore};
use crate::cloud::{
    email_content_hash, CloudDb, CloudOp, CloudResult, ConnectionStatus, EntryField, EntryFilter,
    EntryPatch, OfflineCloud,
};
use crate::config::{Backend, Config};
use crate::expiry::expired_ids;
use crate::limit::apply_local_item_limit;
use crate::local::LocalEntries;
use crate::migration::{migrate_legacy, read_legacy, Migration, MigrationReport};
use crate::models::{
    content_hash, now_millis, ContentUpdate, CreateOutcome, DeleteOutcome, Entry, EntryId,
    StorageLocation, ToggleOutcome,
};
use crate::order::VERSION_KEY;
use crate::shards::{shard_prefix, Shard};
use crate::storage::{FileKv, KvStore, SqliteKv};

/// Clipboard entry store
#[derive(Clone)]
pub struct EntryStore {
    kv: Arc<dyn KvStore>,
    local: LocalEntries,
    migration: Arc<Migration>,
    cloud: Arc<dyn CloudDb>,
    favorites: FavoritesStore,
    tags: TagsStore,
    commands: CommandsStore,
    config: Arc<Config>,
}

impl EntryStore {
    /// Create a store over the given backends
    pub fn new(kv: Arc<dyn KvStore>, cloud: Arc<dyn CloudDb>, config: Config) -> Self {
        Self::assemble(kv, cloud, Arc::new(config), Arc::new(LogBadge))
    }

    /// Replace the badge notifier
    ///
    /// Call before the first entry operation; the migration gate is reset.
    pub fn with_badge(self, badge: Arc<dyn BadgeNotifier>) -> Self {
        Self::assemble(self.kv, self.cloud, self.config, badge)
    }

    fn assemble(
        kv: Arc<dyn KvStore>,
        cloud: Arc<dyn CloudDb>,
        config: Arc<Config>,
        badge: Arc<dyn BadgeNotifier>,
    ) -> Self {
        let local = LocalEntries::new(kv.clone(), badge);
        Self {
            migration: Arc::new(Migration::new(kv.clone(), local.clone())),
            local,
            favorites: FavoritesStore::new(kv.clone()),
            tags: TagsStore::new(kv.clone()),
            commands: CommandsStore::new(kv.clone()),
            kv,
            cloud,
            config,
        }
    }

    /// Open the store from the default configuration
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    /// Open the configured backend, without a cloud account
    pub fn open_with_config(config: Config) -> Result<Self> {
        let kv: Arc<dyn KvStore> = match config.backend {
            Backend::File => Arc::new(
                FileKv::open(config.kv_dir()).context("Failed to open entry directory")?,
            ),
            Backend::Sqlite => Arc::new(
                SqliteKv::open(&config.sqlite_path()).context("Failed to open SQLite database")?,
            ),
        };
        debug!(backend = %config.backend, "Opened entry storage");
        Ok(Self::new(kv, Arc::new(OfflineCloud), config))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn favorites(&self) -> &FavoritesStore {
        &self.favorites
    }

    pub fn tags(&self) -> &TagsStore {
        &self.tags
    }

    pub fn commands(&self) -> &CommandsStore {
        &self.commands
    }

    // ==================== Migration ====================

    /// Run the legacy migration (once per store) and report what it did
    pub async fn run_migration(&self) -> Result<MigrationReport> {
        self.migration
            .ensure()
            .await
            .context("Legacy entry migration failed")
    }

    async fn ensure_migrated(&self) -> Result<()> {
        self.run_migration().await.map(|_| ())
    }

    // ==================== Reads ====================

    /// All local entries in order, oldest first
    pub async fn get_entries(&self) -> Result<Vec<Entry>> {
        self.ensure_migrated().await?;

        let mut order = self
            .local
            .order
            .read()
            .await
            .context("Failed to read entry order")?;

        if order.is_empty() {
            // Legacy data written after the migration ran
            let legacy = read_legacy(self.kv.as_ref())
                .await
                .context("Failed to read legacy entries")?;
            let Some(legacy) = legacy.filter(|entries| !entries.is_empty()) else {
                return Ok(Vec::new());
            };

            info!(entries = legacy.len(), "Migrating reappeared legacy entries");
            migrate_legacy(self.kv.as_ref(), &self.local, &legacy)
                .await
                .context("Failed to migrate legacy entries")?;

            order = self
                .local
                .order
                .read()
                .await
                .context("Failed to read entry order")?;
            if order.is_empty() {
                return Ok(legacy);
            }
        }

        self.local
            .shards
            .entries_by_order(&order)
            .await
            .context("Failed to read entries")
    }

    /// Get a local entry by id
    pub async fn get_entry(&self, id: &EntryId) -> Result<Option<Entry>> {
        self.ensure_migrated().await?;
        self.local.shards.get(id).await.context("Failed to get entry")
    }

    /// Number of ids in the order
    pub async fn entry_count(&self) -> Result<usize> {
        self.ensure_migrated().await?;
        let order = self
            .local
            .order
            .read()
            .await
            .context("Failed to read entry order")?;
        Ok(order.len())
    }

    /// Replace the whole local collection
    pub async fn set_entries(&self, entries: &[Entry]) -> Result<()> {
        self.ensure_migrated().await?;
        self.local
            .write_snapshot(entries)
            .await
            .context("Failed to write entry snapshot")?;
        Ok(())
    }

    // ==================== Create ====================

    /// Store copied content
    ///
    /// A cloud target is best effort: without a signed-in, subscribed user
    /// or on any cloud error the entry is stored locally instead.
    pub async fn create_entry(
        &self,
        content: &str,
        location: StorageLocation,
    ) -> Result<CreateOutcome> {
        if location == StorageLocation::Cloud {
            match self.create_cloud_entry(content).await {
                Ok(true) => return Ok(CreateOutcome::Cloud),
                Ok(false) => debug!("Cloud storage unavailable, storing locally"),
                Err(e) => warn!(error = %e, "Cloud create failed, storing locally"),
            }
        }

        self.ensure_migrated().await?;
        self.create_local_entry(content, now_millis()).await
    }

    /// Upsert into the cloud; `Ok(false)` if the cloud path does not apply
    async fn create_cloud_entry(&self, content: &str) -> CloudResult<bool> {
        let Some(user) = self.cloud.auth().await? else {
            return Ok(false);
        };
        if self.cloud.connection_status() == ConnectionStatus::Closed {
            return Ok(false);
        }
        if self.cloud.query_subscriptions().await?.is_empty() {
            return Ok(false);
        }

        let key = email_content_hash(&user.email, &content_hash(content));
        let existing = self
            .cloud
            .query_entries(&EntryFilter::eq(EntryField::EmailContentHash, key.clone()))
            .await?;

        let now = now_millis();
        let patch = EntryPatch {
            created_at: existing.is_empty().then_some(now),
            copied_at: Some(now),
            content: Some(content.to_string()),
            ..Default::default()
        };
        self.cloud
            .transact(vec![CloudOp::UpsertByLookup {
                email_content_hash: key,
                patch,
                owner: Some(user.email),
            }])
            .await?;

        debug!("Stored entry in the cloud");
        Ok(true)
    }

    /// Local half of `create_entry`, with an explicit timestamp
    pub(crate) async fn create_local_entry(&self, content: &str, now: i64) -> Result<CreateOutcome> {
        let id = EntryId::for_content(content);
        let prefix = shard_prefix(&id);
        let mut shard = self
            .local
            .shards
            .read_shard(&prefix)
            .await
            .context("Failed to read shard")?;

        let order = self
            .local
            .order
            .read()
            .await
            .context("Failed to read entry order")?;
        let mut order: Vec<EntryId> = order.into_iter().filter(|o| o != &id).collect();
        order.push(id.clone());

        if let Some(existing) = shard.get_mut(&id.to_string()) {
            existing.copied_at = Some(now);
            self.local
                .shards
                .persist_one(prefix, shard)
                .await
                .context("Failed to persist shard")?;

            let order = self
                .local
                .order
                .write(&order)
                .await
                .context("Failed to write entry order")?;
            self.local.commit(order.len()).await?;
            return Ok(CreateOutcome::Recopied(id));
        }

        shard.insert(id.to_string(), Entry::new(content, now));
        self.local
            .shards
            .persist_one(prefix, shard)
            .await
            .context("Failed to persist shard")?;

        let mut evicted = Vec::new();
        if let Some(max) = self.config.local_item_limit {
            let favorites = self
                .favorites
                .get_set()
                .await
                .context("Failed to read favorites")?;
            let entries = self
                .local
                .shards
                .entries_by_order(&order)
                .await
                .context("Failed to read entries")?;

            let limited = apply_local_item_limit(entries, max, &favorites);
            order = limited.retained.iter().map(|e| e.id.clone()).collect();

            if !limited.evicted.is_empty() {
                debug!(evicted = limited.evicted.len(), max, "Local item limit reached");
                self.purge(&limited.evicted).await?;
                evicted = limited.evicted;
            }
        }

        let order = self
            .local
            .order
            .write(&order)
            .await
            .context("Failed to write entry order")?;
        self.local.commit(order.len()).await?;

        Ok(CreateOutcome::Created { id, evicted })
    }

    /// Drop ids from shards and their tag and command bindings
    async fn purge(&self, ids: &[EntryId]) -> Result<()> {
        self.local
            .shards
            .remove_ids(ids)
            .await
            .context("Failed to remove entries from shards")?;
        self.tags
            .delete_ids(ids)
            .await
            .context("Failed to delete tag bindings")?;
        self.commands
            .delete_ids(ids)
            .await
            .context("Failed to delete command bindings")?;
        Ok(())
    }

    // ==================== Delete ====================

    /// Delete entries
    ///
    /// Local favorites are skipped. Cloud ids are deleted unconditionally.
    pub async fn delete_entries(&self, ids: &[EntryId]) -> Result<DeleteOutcome> {
        self.ensure_migrated().await?;

        let (cloud_ids, local_ids): (Vec<EntryId>, Vec<EntryId>) =
            ids.iter().cloned().partition(EntryId::is_cloud);
        let mut outcome = DeleteOutcome::default();

        if !local_ids.is_empty() {
            let favorites = self
                .favorites
                .get_set()
                .await
                .context("Failed to read favorites")?;
            let (protected, deletable): (Vec<EntryId>, Vec<EntryId>) = local_ids
                .into_iter()
                .partition(|id| favorites.contains(id));
            outcome.protected = protected;

            if !deletable.is_empty() {
                self.local
                    .shards
                    .remove_ids(&deletable)
                    .await
                    .context("Failed to remove entries from shards")?;

                let doomed: HashSet<&EntryId> = deletable.iter().collect();
                let order: Vec<EntryId> = self
                    .local
                    .order
                    .read()
                    .await
                    .context("Failed to read entry order")?
                    .into_iter()
                    .filter(|id| !doomed.contains(id))
                    .collect();
                let order = self
                    .local
                    .order
                    .write(&order)
                    .await
                    .context("Failed to write entry order")?;

                self.tags
                    .delete_ids(&deletable)
                    .await
                    .context("Failed to delete tag bindings")?;
                self.commands
                    .delete_ids(&deletable)
                    .await
                    .context("Failed to delete command bindings")?;

                self.local.commit(order.len()).await?;
                outcome.deleted.extend(deletable);
            }
        }

        if !cloud_ids.is_empty() {
            let ops = cloud_ids
                .iter()
                .filter_map(|id| match id {
                    EntryId::Cloud(uuid) => Some(CloudOp::DeleteById(*uuid)),
                    EntryId::Local(_) => None,
                })
                .collect();
            self.cloud
                .transact(ops)
                .await
                .context("Failed to delete cloud entries")?;
            outcome.deleted.extend(cloud_ids);
        }

        Ok(outcome)
    }

    /// Delete local entries older than the configured TTL
    pub async fn expire_entries(&self, now: i64) -> Result<DeleteOutcome> {
        let Some(ttl) = self.config.local_ttl else {
            return Ok(DeleteOutcome::default());
        };

        let entries = self.get_entries().await?;
        let expired = expired_ids(&entries, &ttl, now);
        if expired.is_empty() {
            return Ok(DeleteOutcome::default());
        }

        debug!(expired = expired.len(), ttl = %ttl, "Expiring local entries");
        self.delete_entries(&expired).await
    }

    // ==================== Update ====================

    /// Replace the content of an entry
    pub async fn update_entry_content(&self, id: &EntryId, content: &str) -> Result<ContentUpdate> {
        match id {
            EntryId::Cloud(uuid) => self.update_cloud_content(*uuid, content).await,
            EntryId::Local(_) => {
                self.ensure_migrated().await?;
                self.update_local_content(id, content).await
            }
        }
    }

    async fn update_cloud_content(&self, id: Uuid, content: &str) -> Result<ContentUpdate> {
        let Some(user) = self.cloud.auth().await.context("Failed to read cloud session")? else {
            return Ok(ContentUpdate::Unchanged);
        };

        let key = email_content_hash(&user.email, &content_hash(content));
        let conflicts = self
            .cloud
            .query_entries(&EntryFilter::eq(EntryField::EmailContentHash, key.clone()))
            .await
            .context("Failed to query cloud entries")?;
        if !conflicts.is_empty() {
            return Ok(ContentUpdate::NotUnique);
        }

        self.cloud
            .transact(vec![CloudOp::UpdateById {
                id,
                patch: EntryPatch {
                    content: Some(content.to_string()),
                    email_content_hash: Some(key),
                    ..Default::default()
                },
            }])
            .await
            .context("Failed to update cloud entry")?;

        Ok(ContentUpdate::Updated {
            id: EntryId::Cloud(id),
        })
    }

    async fn update_local_content(&self, id: &EntryId, content: &str) -> Result<ContentUpdate> {
        let new_id = EntryId::for_content(content);
        if self
            .local
            .shards
            .contains(&new_id)
            .await
            .context("Failed to look up entry")?
        {
            return Ok(ContentUpdate::NotUnique);
        }

        let old_prefix = shard_prefix(id);
        let mut old_shard = self
            .local
            .shards
            .read_shard(&old_prefix)
            .await
            .context("Failed to read shard")?;
        let Some(existing) = old_shard.remove(&id.to_string()) else {
            return Ok(ContentUpdate::Unchanged);
        };
        let updated = existing.with_content(content);

        let new_prefix = shard_prefix(&new_id);
        let mut updates: BTreeMap<String, Shard> = BTreeMap::new();
        if new_prefix == old_prefix {
            old_shard.insert(new_id.to_string(), updated);
            updates.insert(old_prefix, old_shard);
        } else {
            let mut new_shard = self
                .local
                .shards
                .read_shard(&new_prefix)
                .await
                .context("Failed to read shard")?;
            new_shard.insert(new_id.to_string(), updated);
            updates.insert(old_prefix, old_shard);
            updates.insert(new_prefix, new_shard);
        }
        self.local
            .shards
            .persist(updates)
            .await
            .context("Failed to persist shards")?;

        let mut order = self
            .local
            .order
            .read()
            .await
            .context("Failed to read entry order")?;
        match order.iter().position(|o| o == id) {
            Some(pos) => order[pos] = new_id.clone(),
            None => order.push(new_id.clone()),
        }
        let order = self
            .local
            .order
            .write(&order)
            .await
            .context("Failed to write entry order")?;

        self.favorites
            .rename(id, &new_id)
            .await
            .context("Failed to move favorite")?;
        self.tags
            .rename(id, &new_id)
            .await
            .context("Failed to move tags")?;
        self.commands
            .rename(id, &new_id)
            .await
            .context("Failed to move command bindings")?;

        self.local.commit(order.len()).await?;
        Ok(ContentUpdate::Updated { id: new_id })
    }

    // ==================== Toggle ====================

    /// Move an entry between local storage and the cloud
    pub async fn toggle_entry_storage_location(&self, id: &EntryId) -> Result<ToggleOutcome> {
        self.ensure_migrated().await?;

        match id {
            EntryId::Cloud(uuid) => self.move_to_local(*uuid).await,
            EntryId::Local(_) => self.move_to_cloud(id).await,
        }
    }

    async fn move_to_local(&self, id: Uuid) -> Result<ToggleOutcome> {
        let records = self
            .cloud
            .query_entries(&EntryFilter::eq(EntryField::Id, id.hyphenated().to_string()))
            .await
            .context("Failed to query cloud entry")?;
        let Some(record) = records.into_iter().next() else {
            return Ok(ToggleOutcome::NotFound);
        };

        let local_id = EntryId::for_content(&record.content);
        let mut entries = self.get_entries().await?;
        if entries.iter().any(|e| e.id == local_id) {
            return Ok(ToggleOutcome::AlreadyPresent);
        }

        entries.push(Entry {
            id: local_id.clone(),
            created_at: record.created_at,
            copied_at: record.copied_at,
            content: record.content.clone(),
        });
        self.local
            .write_snapshot(&entries)
            .await
            .context("Failed to write entry snapshot")?;

        let marker = [local_id.clone()];
        let favorited = if record.is_favorited.unwrap_or(false) {
            self.favorites.add(&marker).await
        } else {
            self.favorites.delete_ids(&marker).await
        };
        favorited.context("Failed to update favorites")?;
        self.tags
            .set(&local_id, record.tag_list())
            .await
            .context("Failed to copy tags")?;

        self.cloud
            .transact(vec![CloudOp::DeleteById(id)])
            .await
            .context("Failed to delete cloud entry")?;

        info!(id = %local_id, "Moved entry to local storage");
        Ok(ToggleOutcome::MovedToLocal(local_id))
    }

    async fn move_to_cloud(&self, id: &EntryId) -> Result<ToggleOutcome> {
        let favorites = self
            .favorites
            .get_set()
            .await
            .context("Failed to read favorites")?;
        let Some(user) = self.cloud.auth().await.context("Failed to read cloud session")? else {
            return Ok(ToggleOutcome::NotSignedIn);
        };
        let Some(entry) = self.local.shards.get(id).await.context("Failed to get entry")? else {
            return Ok(ToggleOutcome::NotFound);
        };

        let key = email_content_hash(&user.email, &entry.id.to_string());
        let existing = self
            .cloud
            .query_entries(&EntryFilter::eq(EntryField::EmailContentHash, key.clone()))
            .await
            .context("Failed to query cloud entries")?;
        if !existing.is_empty() {
            return Ok(ToggleOutcome::AlreadyPresent);
        }

        let tags = self.tags.get(&entry.id).await.context("Failed to read tags")?;
        let tags = if tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&tags).context("Failed to encode tags")?)
        };

        self.cloud
            .transact(vec![CloudOp::UpsertByLookup {
                email_content_hash: key,
                patch: EntryPatch {
                    created_at: Some(entry.created_at),
                    copied_at: entry.copied_at,
                    content: Some(entry.content.clone()),
                    is_favorited: Some(favorites.contains(&entry.id)),
                    tags,
                    email_content_hash: None,
                },
                owner: Some(user.email),
            }])
            .await
            .context("Failed to copy entry to the cloud")?;

        // Give the remote write time to become visible before dropping the
        // only local copy
        tokio::time::sleep(self.config.cloud_settle_delay()).await;

        self.favorites
            .delete_ids(std::slice::from_ref(id))
            .await
            .context("Failed to clear favorite")?;
        self.delete_entries(std::slice::from_ref(id)).await?;

        info!(id = %id, "Moved entry to the cloud");
        Ok(ToggleOutcome::MovedToCloud)
    }

    // ==================== Bindings ====================

    pub async fn favorite_ids(&self) -> Result<Vec<EntryId>> {
        self.favorites
            .get_all()
            .await
            .context("Failed to read favorites")
    }

    pub async fn add_favorites(&self, ids: &[EntryId]) -> Result<()> {
        self.favorites
            .add(ids)
            .await
            .context("Failed to add favorites")
    }

    pub async fn remove_favorites(&self, ids: &[EntryId]) -> Result<()> {
        self.favorites
            .delete_ids(ids)
            .await
            .context("Failed to remove favorites")
    }

    pub async fn tags_for(&self, id: &EntryId) -> Result<Vec<String>> {
        self.tags.get(id).await.context("Failed to read tags")
    }

    pub async fn set_tags(&self, id: &EntryId, tags: Vec<String>) -> Result<()> {
        self.tags.set(id, tags).await.context("Failed to write tags")
    }

    // ==================== Watch ====================

    /// Call `callback` with the full entry list after every committed change
    ///
    /// Must be called from within a Tokio runtime. The watch stops when the
    /// returned handle is dropped.
    pub fn watch_entries<F>(&self, callback: F) -> WatchHandle
    where
        F: Fn(Vec<Entry>) + Send + 'static,
    {
        let mut changes = self.kv.subscribe();
        let store = self.clone();

        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.key != VERSION_KEY => continue,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Entry watcher lagged, re-reading");
                    }
                    Err(RecvError::Closed) => break,
                }

                match store.get_entries().await {
                    Ok(entries) => callback(entries),
                    Err(e) => warn!(error = %e, "Failed to reload entries for watcher"),
                }
            }
        });

        WatchHandle { task }
    }
}

/// Running entry watch; dropping it stops the watch
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn stop(self) {}
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
