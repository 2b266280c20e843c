//! Per-entry bindings: favorites, tags and keyboard commands
//!
//! These live next to the entries in the same storage area, keyed by entry
//! id. Nothing links them to the entries themselves, so the entry store
//! cascades deletes and renames into each of them explicitly.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::EntryId;
use crate::storage::kv::{self, KvStore};
use crate::storage::StorageResult;

/// Storage key of the favorite id list
pub const FAVORITES_KEY: &str = "favoriteEntryIds";
/// Storage key of the id -> tags map
pub const TAGS_KEY: &str = "entryIdToTags";
/// Storage key of the command bindings
pub const COMMANDS_KEY: &str = "entryCommands";

/// Favorited entry ids
#[derive(Clone)]
pub struct FavoritesStore {
    kv: Arc<dyn KvStore>,
}

impl FavoritesStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get_all(&self) -> StorageResult<Vec<EntryId>> {
        Ok(kv::read(self.kv.as_ref(), FAVORITES_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Favorites as a set, for membership checks
    pub async fn get_set(&self) -> StorageResult<HashSet<EntryId>> {
        Ok(self.get_all().await?.into_iter().collect())
    }

    pub async fn set_all(&self, ids: &[EntryId]) -> StorageResult<()> {
        kv::write(self.kv.as_ref(), FAVORITES_KEY, ids).await
    }

    /// Add ids, ignoring ones already favorited
    pub async fn add(&self, ids: &[EntryId]) -> StorageResult<()> {
        let mut favorites = self.get_all().await?;
        for id in ids {
            if !favorites.contains(id) {
                favorites.push(id.clone());
            }
        }
        self.set_all(&favorites).await
    }

    pub async fn delete_ids(&self, ids: &[EntryId]) -> StorageResult<()> {
        let favorites = self.get_all().await?;
        let kept: Vec<EntryId> = favorites.into_iter().filter(|id| !ids.contains(id)).collect();
        self.set_all(&kept).await
    }

    /// Move the favorite mark from `old` to `new`
    pub async fn rename(&self, old: &EntryId, new: &EntryId) -> StorageResult<()> {
        let favorites = self.get_all().await?;
        if !favorites.contains(old) {
            return Ok(());
        }
        let renamed: Vec<EntryId> = favorites
            .into_iter()
            .map(|id| if &id == old { new.clone() } else { id })
            .collect();
        self.set_all(&renamed).await
    }
}

/// Tags attached to entries
#[derive(Clone)]
pub struct TagsStore {
    kv: Arc<dyn KvStore>,
}

impl TagsStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get_all(&self) -> StorageResult<BTreeMap<String, Vec<String>>> {
        Ok(kv::read(self.kv.as_ref(), TAGS_KEY).await?.unwrap_or_default())
    }

    pub async fn set_all(&self, tags: &BTreeMap<String, Vec<String>>) -> StorageResult<()> {
        kv::write(self.kv.as_ref(), TAGS_KEY, tags).await
    }

    /// Tags of one entry (empty if none)
    pub async fn get(&self, id: &EntryId) -> StorageResult<Vec<String>> {
        Ok(self
            .get_all()
            .await?
            .remove(&id.to_string())
            .unwrap_or_default())
    }

    /// Replace the tags of one entry; an empty list drops the binding
    pub async fn set(&self, id: &EntryId, tags: Vec<String>) -> StorageResult<()> {
        let mut all = self.get_all().await?;
        if tags.is_empty() {
            all.remove(&id.to_string());
        } else {
            all.insert(id.to_string(), tags);
        }
        self.set_all(&all).await
    }

    pub async fn delete_ids(&self, ids: &[EntryId]) -> StorageResult<()> {
        let mut all = self.get_all().await?;
        let before = all.len();
        for id in ids {
            all.remove(&id.to_string());
        }
        if all.len() == before {
            return Ok(());
        }
        self.set_all(&all).await
    }

    /// Move tags from `old` to `new`
    pub async fn rename(&self, old: &EntryId, new: &EntryId) -> StorageResult<()> {
        let mut all = self.get_all().await?;
        match all.remove(&old.to_string()) {
            Some(tags) => {
                all.insert(new.to_string(), tags);
                self.set_all(&all).await
            }
            None => Ok(()),
        }
    }

    /// Every distinct tag with the number of entries carrying it
    pub async fn counts(&self) -> StorageResult<Vec<(String, usize)>> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for tags in self.get_all().await?.into_values() {
            for tag in tags {
                *counts.entry(tag).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

/// A keyboard shortcut that pastes a specific entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryCommand {
    pub shortcut: String,
    pub entry_id: EntryId,
}

/// Shortcut bindings
#[derive(Clone)]
pub struct CommandsStore {
    kv: Arc<dyn KvStore>,
}

impl CommandsStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get_all(&self) -> StorageResult<Vec<EntryCommand>> {
        Ok(kv::read(self.kv.as_ref(), COMMANDS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn set_all(&self, commands: &[EntryCommand]) -> StorageResult<()> {
        kv::write(self.kv.as_ref(), COMMANDS_KEY, commands).await
    }

    /// Bind `shortcut` to an entry, replacing any existing binding for it
    pub async fn bind(&self, shortcut: &str, id: &EntryId) -> StorageResult<()> {
        let mut commands: Vec<EntryCommand> = self
            .get_all()
            .await?
            .into_iter()
            .filter(|c| c.shortcut != shortcut)
            .collect();
        commands.push(EntryCommand {
            shortcut: shortcut.to_string(),
            entry_id: id.clone(),
        });
        self.set_all(&commands).await
    }

    pub async fn delete_ids(&self, ids: &[EntryId]) -> StorageResult<()> {
        let commands = self.get_all().await?;
        let before = commands.len();
        let kept: Vec<EntryCommand> = commands
            .into_iter()
            .filter(|c| !ids.contains(&c.entry_id))
            .collect();
        if kept.len() == before {
            return Ok(());
        }
        self.set_all(&kept).await
    }

    /// Point every binding of `old` at `new`
    pub async fn rename(&self, old: &EntryId, new: &EntryId) -> StorageResult<()> {
        let commands = self.get_all().await?;
        if !commands.iter().any(|c| &c.entry_id == old) {
            return Ok(());
        }
        let renamed: Vec<EntryCommand> = commands
            .into_iter()
            .map(|c| {
                if &c.entry_id == old {
                    EntryCommand {
                        entry_id: new.clone(),
                        ..c
                    }
                } else {
                    c
                }
            })
            .collect();
        self.set_all(&renamed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;

    fn id(content: &str) -> EntryId {
        EntryId::for_content(content)
    }

    #[tokio::test]
    async fn test_favorites_add_delete_rename() {
        let favorites = FavoritesStore::new(Arc::new(MemoryKv::new()));

        favorites.add(&[id("a"), id("b"), id("a")]).await.unwrap();
        assert_eq!(favorites.get_all().await.unwrap(), vec![id("a"), id("b")]);

        favorites.rename(&id("a"), &id("c")).await.unwrap();
        assert_eq!(favorites.get_all().await.unwrap(), vec![id("c"), id("b")]);

        favorites.delete_ids(&[id("b")]).await.unwrap();
        assert_eq!(favorites.get_all().await.unwrap(), vec![id("c")]);
        assert!(favorites.get_set().await.unwrap().contains(&id("c")));
    }

    #[tokio::test]
    async fn test_tags_set_rename_delete() {
        let tags = TagsStore::new(Arc::new(MemoryKv::new()));

        tags.set(&id("a"), vec!["work".into(), "code".into()])
            .await
            .unwrap();
        tags.set(&id("b"), vec!["work".into()]).await.unwrap();

        tags.rename(&id("a"), &id("z")).await.unwrap();
        assert!(tags.get(&id("a")).await.unwrap().is_empty());
        assert_eq!(tags.get(&id("z")).await.unwrap(), vec!["work", "code"]);

        assert_eq!(
            tags.counts().await.unwrap(),
            vec![("code".to_string(), 1), ("work".to_string(), 2)]
        );

        tags.delete_ids(&[id("z"), id("b")]).await.unwrap();
        assert!(tags.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_setting_empty_tags_drops_binding() {
        let tags = TagsStore::new(Arc::new(MemoryKv::new()));
        tags.set(&id("a"), vec!["x".into()]).await.unwrap();
        tags.set(&id("a"), Vec::new()).await.unwrap();

        assert!(!tags.get_all().await.unwrap().contains_key(&id("a").to_string()));
    }

    #[tokio::test]
    async fn test_commands_bind_rename_delete() {
        let commands = CommandsStore::new(Arc::new(MemoryKv::new()));

        commands.bind("Alt+1", &id("a")).await.unwrap();
        commands.bind("Alt+2", &id("b")).await.unwrap();
        // Rebinding a shortcut replaces it
        commands.bind("Alt+1", &id("c")).await.unwrap();

        let all = commands.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|c| c.shortcut == "Alt+1" && c.entry_id == id("c")));

        commands.rename(&id("b"), &id("d")).await.unwrap();
        commands.delete_ids(&[id("c")]).await.unwrap();

        assert_eq!(
            commands.get_all().await.unwrap(),
            vec![EntryCommand {
                shortcut: "Alt+2".into(),
                entry_id: id("d"),
            }]
        );
    }

    #[tokio::test]
    async fn test_command_serialized_field_names() {
        let command = EntryCommand {
            shortcut: "Alt+1".into(),
            entry_id: id("a"),
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["entryId"], id("a").to_string());
    }
}
