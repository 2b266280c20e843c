//! Status command handler

use anyhow::{Context, Result};

use clipstash_core::EntryStore;

use crate::output::{format_millis, Output, OutputFormat};

/// Show status information
pub async fn show(store: &EntryStore, output: &Output) -> Result<()> {
    let report = store.run_migration().await?;
    let entries = store.get_entries().await?;
    let favorites = store.favorite_ids().await?;
    let tags = store.tags().counts().await.context("Failed to read tags")?;
    let config = store.config();

    let newest = entries.iter().map(|e| e.last_copied()).max();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "backend": config.backend.to_string(),
                    "data_dir": config.data_dir,
                    "migration": format!("{:?}", report),
                    "counts": {
                        "entries": entries.len(),
                        "favorites": favorites.len(),
                        "tags": tags.len()
                    },
                    "local_item_limit": config.local_item_limit,
                    "local_ttl": config.local_ttl.map(|t| t.to_string()),
                    "last_copied_at": newest
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", entries.len());
        }
        OutputFormat::Human => {
            println!("clipstash Status");
            println!("================");
            println!();
            println!("Storage:");
            println!("  Backend:  {}", config.backend);
            println!("  Location: {}", config.data_dir.display());
            println!("  Legacy:   {:?}", report);
            println!();
            println!("Limits:");
            println!(
                "  Items: {}",
                config
                    .local_item_limit
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "(unlimited)".to_string())
            );
            println!(
                "  TTL:   {}",
                config
                    .local_ttl
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "(never expire)".to_string())
            );
            println!();
            println!("Contents:");
            println!("  Entries:   {}", entries.len());
            println!("  Favorites: {}", favorites.len());
            println!("  Tags:      {}", tags.len());
            if let Some(newest) = newest {
                println!("  Last copy: {}", format_millis(newest));
            }
        }
    }

    Ok(())
}
