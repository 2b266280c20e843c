//! Command handlers

pub mod config;
pub mod entry;
pub mod favorite;
pub mod status;
pub mod tag;

use anyhow::{bail, Result};

use clipstash_core::models::CLOUD_ID_LEN;
use clipstash_core::{Entry, EntryId, EntryStore};

/// Length of a full local id (hex SHA-256)
const LOCAL_ID_LEN: usize = 64;

/// Resolve an entry id (full local hash, cloud record id, or local prefix)
pub async fn resolve_id(store: &EntryStore, id: &str) -> Result<EntryId> {
    if id.len() == LOCAL_ID_LEN || id.len() == CLOUD_ID_LEN {
        return Ok(EntryId::parse(id));
    }

    let entries = store.get_entries().await?;
    match_prefix(id, &entries)
}

/// Resolve several ids, failing on the first unknown one
pub async fn resolve_ids(store: &EntryStore, ids: &[String]) -> Result<Vec<EntryId>> {
    let mut resolved = Vec::with_capacity(ids.len());
    for id in ids {
        resolved.push(resolve_id(store, id).await?);
    }
    Ok(resolved)
}

fn match_prefix(prefix: &str, entries: &[Entry]) -> Result<EntryId> {
    if prefix.is_empty() {
        bail!("Entry ID must not be empty");
    }

    let matches: Vec<_> = entries
        .iter()
        .filter(|e| e.id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => bail!("No entry found matching: {}", prefix),
        [only] => Ok(only.id.clone()),
        _ => {
            eprintln!("Multiple entries match '{}':", prefix);
            for entry in &matches {
                eprintln!("  {}", entry.id);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_prefix() {
        // "a" hashes to ca97..., "b" to 3e23..., "c" to 2e7d...
        let entries = vec![Entry::new("a", 0), Entry::new("b", 0), Entry::new("c", 0)];

        assert_eq!(match_prefix("ca9", &entries).unwrap(), entries[0].id);
        assert_eq!(match_prefix("3e", &entries).unwrap(), entries[1].id);
        assert!(match_prefix("ffff", &entries).is_err());
        assert!(match_prefix("", &entries).is_err());
    }

    #[test]
    fn test_match_prefix_ambiguous() {
        // "b" hashes to 3e23..., "e" to 3f79...
        let entries = vec![Entry::new("b", 0), Entry::new("e", 0)];

        let err = match_prefix("3", &entries).unwrap_err();
        assert!(err.to_string().contains("Ambiguous"));
        assert_eq!(match_prefix("3f", &entries).unwrap(), entries[1].id);
    }
}
