//! Favorite command handlers

use anyhow::Result;

use clipstash_core::EntryStore;

use super::resolve_ids;
use crate::output::Output;

/// Mark entries as favorites
pub async fn add(store: &EntryStore, ids: Vec<String>, output: &Output) -> Result<()> {
    let ids = resolve_ids(store, &ids).await?;
    store.add_favorites(&ids).await?;
    output.success(&format!("Favorited {} entry(s)", ids.len()));
    Ok(())
}

/// Unmark favorites
pub async fn remove(store: &EntryStore, ids: Vec<String>, output: &Output) -> Result<()> {
    let ids = resolve_ids(store, &ids).await?;
    store.remove_favorites(&ids).await?;
    output.success(&format!("Unfavorited {} entry(s)", ids.len()));
    Ok(())
}

pub async fn list(store: &EntryStore, output: &Output) -> Result<()> {
    let ids = store.favorite_ids().await?;
    output.print_ids("favorites", &ids);
    Ok(())
}
