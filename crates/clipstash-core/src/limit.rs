//! Local item limit
//!
//! Caps how many entries local storage keeps. The oldest entries go first;
//! favorites are never evicted, even if that leaves the collection over the
//! limit.

use std::collections::HashSet;

use crate::models::{Entry, EntryId};

/// Outcome of applying the limit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LimitResult {
    /// Entries kept, in their original order
    pub retained: Vec<Entry>,
    /// Ids of the evicted entries, oldest first
    pub evicted: Vec<EntryId>,
}

/// Evict the oldest non-favorite entries until at most `max` remain
///
/// `entries` must be in order position (oldest first).
pub fn apply_local_item_limit(
    entries: Vec<Entry>,
    max: usize,
    favorites: &HashSet<EntryId>,
) -> LimitResult {
    let mut excess = entries.len().saturating_sub(max);
    if excess == 0 {
        return LimitResult {
            retained: entries,
            evicted: Vec::new(),
        };
    }

    let mut result = LimitResult::default();
    for entry in entries {
        if excess > 0 && !favorites.contains(&entry.id) {
            excess -= 1;
            result.evicted.push(entry.id);
        } else {
            result.retained.push(entry);
        }
    }
    result
}
