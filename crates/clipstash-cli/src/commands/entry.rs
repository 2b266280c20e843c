//! Entry command handlers

use anyhow::{bail, Context, Result};
use tokio::signal;

use clipstash_core::models::now_millis;
use clipstash_core::{
    ContentUpdate, CreateOutcome, EntryStore, MigrationReport, StorageLocation, ToggleOutcome,
};

use super::{resolve_id, resolve_ids};
use crate::editor::{confirm, edit_text, read_piped_stdin};
use crate::output::{short_id, Output};

/// List entries, optionally only favorites or one tag
pub async fn list(
    store: &EntryStore,
    tag: Option<String>,
    favorites_only: bool,
    output: &Output,
) -> Result<()> {
    let mut entries = store.get_entries().await?;
    let favorites = store
        .favorites()
        .get_set()
        .await
        .context("Failed to read favorites")?;

    if favorites_only {
        entries.retain(|e| favorites.contains(&e.id));
    }
    if let Some(ref tag) = tag {
        let tagged = store.tags().get_all().await.context("Failed to read tags")?;
        entries.retain(|e| {
            tagged
                .get(&e.id.to_string())
                .is_some_and(|tags| tags.iter().any(|t| t == tag))
        });
    }

    output.print_entries(&entries, &favorites);
    Ok(())
}

/// Show a single entry
pub async fn show(store: &EntryStore, id: String, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id).await?;
    let entry = store
        .get_entry(&id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Entry not found: {}", id))?;

    let favorite = store
        .favorites()
        .get_set()
        .await
        .context("Failed to read favorites")?
        .contains(&entry.id);
    let tags = store.tags_for(&entry.id).await?;

    output.print_entry(&entry, favorite, &tags);
    Ok(())
}

/// Store content given as an argument or piped on stdin
pub async fn add(
    store: &EntryStore,
    content: Option<String>,
    cloud: bool,
    output: &Output,
) -> Result<()> {
    let content = match content {
        Some(content) => content,
        None => read_piped_stdin()?
            .ok_or_else(|| anyhow::anyhow!("No content given. Pass it as an argument or pipe it in."))?,
    };
    if content.is_empty() {
        bail!("Refusing to store empty content");
    }

    let location = if cloud {
        StorageLocation::Cloud
    } else {
        StorageLocation::Local
    };

    match store.create_entry(&content, location).await? {
        CreateOutcome::Cloud => output.success("Stored entry in the cloud"),
        CreateOutcome::Recopied(id) => {
            output.success(&format!("Entry already stored, marked as copied: {}", short_id(&id)))
        }
        CreateOutcome::Created { id, evicted } => {
            if cloud {
                output.message("Cloud storage unavailable, stored locally");
            }
            output.success(&format!("Created entry: {}", short_id(&id)));
            if !evicted.is_empty() {
                output.message(&format!(
                    "Item limit reached, evicted {} entry(s)",
                    evicted.len()
                ));
            }
        }
    }

    Ok(())
}

/// Delete entries (favorites are kept)
pub async fn delete(store: &EntryStore, ids: Vec<String>, yes: bool, output: &Output) -> Result<()> {
    let ids = resolve_ids(store, &ids).await?;
    if ids.is_empty() {
        bail!("No entry IDs given");
    }

    if output.should_prompt() && !yes {
        println!("Delete {} entry(s)", ids.len());
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let outcome = store
        .delete_entries(&ids)
        .await
        .context("Failed to delete entries")?;

    output.success(&format!("Deleted {} entry(s)", outcome.deleted.len()));
    if !outcome.protected.is_empty() {
        output.message(&format!(
            "Kept {} favorite(s); unfavorite them first",
            outcome.protected.len()
        ));
    }

    Ok(())
}

/// Replace an entry's content, from `--content` or the editor
pub async fn edit(
    store: &EntryStore,
    id: String,
    content: Option<String>,
    output: &Output,
) -> Result<()> {
    let id = resolve_id(store, &id).await?;

    let content = match content {
        Some(content) => content,
        None => {
            let entry = store
                .get_entry(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Entry not found: {}", id))?;
            let edited = edit_text(&entry.content)?;
            if edited == entry.content {
                output.message("No changes.");
                return Ok(());
            }
            edited
        }
    };
    if content.is_empty() {
        bail!("Refusing to store empty content");
    }

    match store.update_entry_content(&id, &content).await? {
        ContentUpdate::Updated { id } => {
            output.success(&format!("Entry updated: {}", short_id(&id)))
        }
        ContentUpdate::Unchanged => output.message("Entry not found; nothing changed."),
        ContentUpdate::NotUnique => bail!("Another entry already has this content"),
    }

    Ok(())
}

/// Move an entry between local storage and the cloud
pub async fn toggle(store: &EntryStore, id: String, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id).await?;

    match store.toggle_entry_storage_location(&id).await? {
        ToggleOutcome::MovedToLocal(id) => {
            output.success(&format!("Moved to local storage: {}", short_id(&id)))
        }
        ToggleOutcome::MovedToCloud => output.success("Moved to the cloud"),
        ToggleOutcome::AlreadyPresent => {
            output.message("The destination already holds this content; nothing moved.")
        }
        ToggleOutcome::NotFound => bail!("Entry not found: {}", id),
        ToggleOutcome::NotSignedIn => bail!("Moving entries to the cloud requires signing in"),
    }

    Ok(())
}

/// Print the entry list on every change until interrupted
pub async fn watch(store: &EntryStore, output: &Output) -> Result<()> {
    let favorites = store
        .favorites()
        .get_set()
        .await
        .context("Failed to read favorites")?;
    output.print_entries(&store.get_entries().await?, &favorites);

    let format = output.format;
    let favorites_store = store.favorites().clone();
    let handle = store.watch_entries(move |entries| {
        let output = Output::new(format);
        let favorites = favorites_store.clone();
        // Favorites are read on the runtime; the callback itself is sync
        tokio::spawn(async move {
            let favorites = favorites.get_set().await.unwrap_or_default();
            output.print_entries(&entries, &favorites);
        });
    });

    output.message("Watching for changes (Ctrl-C to stop)...");
    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.stop();

    Ok(())
}

/// Delete local entries older than the configured TTL
pub async fn prune(store: &EntryStore, output: &Output) -> Result<()> {
    let Some(ttl) = store.config().local_ttl else {
        output.message("No local_ttl configured; nothing to prune.");
        return Ok(());
    };

    let outcome = store.expire_entries(now_millis()).await?;
    output.success(&format!(
        "Pruned {} entry(s) older than {}",
        outcome.deleted.len(),
        ttl
    ));
    if !outcome.protected.is_empty() {
        output.message(&format!("Kept {} favorite(s)", outcome.protected.len()));
    }

    Ok(())
}

/// Run the legacy migration and report the result
pub async fn migrate(store: &EntryStore, output: &Output) -> Result<()> {
    match store.run_migration().await? {
        MigrationReport::NothingToMigrate => output.message("No legacy entries found."),
        MigrationReport::DiscardedCorrupt => {
            output.message("Legacy entries were unreadable and have been discarded.")
        }
        MigrationReport::Migrated(count) => {
            output.success(&format!("Migrated {} legacy entry(s)", count))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use clipstash_core::{Config, EntryId};
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> EntryStore {
        EntryStore::open_with_config(Config {
            data_dir: temp.path().to_path_buf(),
            ..Config::default()
        })
        .unwrap()
    }

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    #[tokio::test]
    async fn test_add_then_edit_by_prefix() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        add(&store, Some("a".into()), false, &quiet()).await.unwrap();
        edit(&store, "ca9781".into(), Some("z".into()), &quiet())
            .await
            .unwrap();

        let entries = store.get_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "z");
    }

    #[tokio::test]
    async fn test_add_cloud_falls_back_locally() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        add(&store, Some("x".into()), true, &quiet()).await.unwrap();
        assert_eq!(store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_edit_conflict_is_an_error() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        add(&store, Some("a".into()), false, &quiet()).await.unwrap();
        add(&store, Some("b".into()), false, &quiet()).await.unwrap();

        let id = EntryId::for_content("a").to_string();
        assert!(edit(&store, id, Some("b".into()), &quiet()).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_keeps_favorites() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        add(&store, Some("a".into()), false, &quiet()).await.unwrap();
        add(&store, Some("b".into()), false, &quiet()).await.unwrap();
        store
            .add_favorites(&[EntryId::for_content("a")])
            .await
            .unwrap();

        delete(&store, vec!["ca97".into(), "3e23".into()], true, &quiet())
            .await
            .unwrap();

        let entries = store.get_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "a");
    }

    #[tokio::test]
    async fn test_toggle_without_account_fails() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        add(&store, Some("a".into()), false, &quiet()).await.unwrap();

        assert!(toggle(&store, "ca97".into(), &quiet()).await.is_err());
        assert_eq!(store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_empty_content() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        assert!(add(&store, Some(String::new()), false, &quiet()).await.is_err());
    }
}
