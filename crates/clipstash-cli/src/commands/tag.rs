//! Tag command handlers

use anyhow::{Context, Result};

use clipstash_core::EntryStore;

use super::resolve_id;
use crate::output::{short_id, Output};

/// List all tags with usage counts
pub async fn list(store: &EntryStore, output: &Output) -> Result<()> {
    let tags = store.tags().counts().await.context("Failed to read tags")?;
    output.print_tags(&tags);
    Ok(())
}

/// Replace the tags on an entry (no tags clears them)
pub async fn set(store: &EntryStore, id: String, tags: Vec<String>, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id).await?;
    let tags = normalize(tags);

    store.set_tags(&id, tags.clone()).await?;

    if tags.is_empty() {
        output.success(&format!("Cleared tags on {}", short_id(&id)));
    } else {
        output.success(&format!("Tagged {}: {}", short_id(&id), tags.join(", ")));
    }
    Ok(())
}

/// Split comma-separated values, trim, drop empties and duplicates
fn normalize(raw: Vec<String>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.iter().flat_map(|t| t.split(',')) {
        let tag = tag.trim();
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}
