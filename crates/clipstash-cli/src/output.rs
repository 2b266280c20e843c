//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::collections::HashSet;

use chrono::DateTime;
use serde::Serialize;

use clipstash_core::{Entry, EntryId};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Entry as printed in JSON mode
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryView<'a> {
    #[serde(flatten)]
    entry: &'a Entry,
    favorite: bool,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single entry with its bindings
    pub fn print_entry(&self, entry: &Entry, favorite: bool, tags: &[String]) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", entry.id);
                println!("Created:  {}", format_millis(entry.created_at));
                println!("Copied:   {}", format_millis(entry.last_copied()));
                println!("Favorite: {}", if favorite { "yes" } else { "no" });
                if !tags.is_empty() {
                    println!("Tags:     {}", tags.join(", "));
                }
                println!();
                println!("{}", entry.content);
            }
            OutputFormat::Json => print_json(&EntryView {
                entry,
                favorite,
                tags,
            }),
            OutputFormat::Quiet => println!("{}", entry.id),
        }
    }

    /// Print a list of entries, oldest first
    pub fn print_entries(&self, entries: &[Entry], favorites: &HashSet<EntryId>) {
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("No entries found.");
                    return;
                }
                for entry in entries {
                    println!("{}", entry_line(entry, favorites.contains(&entry.id)));
                }
                println!("\n{} entry(s)", entries.len());
            }
            OutputFormat::Json => {
                let views: Vec<_> = entries
                    .iter()
                    .map(|entry| EntryView {
                        entry,
                        favorite: favorites.contains(&entry.id),
                        tags: &[],
                    })
                    .collect();
                print_json(&views);
            }
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.id);
                }
            }
        }
    }

    /// Print a list of ids under a heading
    pub fn print_ids(&self, heading: &str, ids: &[EntryId]) {
        match self.format {
            OutputFormat::Human => {
                if ids.is_empty() {
                    println!("No {}.", heading);
                    return;
                }
                println!("{}:", heading);
                for id in ids {
                    println!("  {}", short_id(id));
                }
            }
            OutputFormat::Json => print_json(&ids),
            OutputFormat::Quiet => {
                for id in ids {
                    println!("{}", id);
                }
            }
        }
    }

    /// Print a list of tags
    pub fn print_tags(&self, tags: &[(String, usize)]) {
        match self.format {
            OutputFormat::Human => {
                if tags.is_empty() {
                    println!("No tags found.");
                    return;
                }
                for (name, count) in tags {
                    println!("{} ({})", name, count);
                }
                println!("\n{} tag(s)", tags.len());
            }
            OutputFormat::Json => {
                let json_tags: Vec<_> = tags
                    .iter()
                    .map(|(name, count)| serde_json::json!({"name": name, "count": count}))
                    .collect();
                print_json(&json_tags);
            }
            OutputFormat::Quiet => {
                for (name, _) in tags {
                    println!("{}", name);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

/// One-line summary of an entry
fn entry_line(entry: &Entry, favorite: bool) -> String {
    format!(
        "{} | {} | {}{}",
        short_id(&entry.id),
        format_millis(entry.last_copied()),
        if favorite { "★ " } else { "" },
        truncate_line(&entry.content, 50)
    )
}

/// First 8 characters of an id
pub fn short_id(id: &EntryId) -> String {
    id.to_string().chars().take(8).collect()
}

/// Render epoch milliseconds as a UTC date and time
pub fn format_millis(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
