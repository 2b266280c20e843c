//! clipstash Core Library
//!
//! This crate provides the core functionality for clipstash, a clipboard
//! history that keeps entries in a sharded local key-value store and can
//! move them to and from a per-user cloud collection.
//!
//! # Architecture
//!
//! - **Key-value area**: the only persistence primitive (memory, files or SQLite)
//! - **Shards**: entries grouped by the first characters of their content hash
//! - **Order index**: the canonical list of entry ids, oldest first
//! - **Version token**: rewritten after every committed change, watched by hosts
//!
//! # Quick Start
//!
//! ```text
//! let store = EntryStore::open()?;
//!
//! // Store copied text
//! store.create_entry("hello", StorageLocation::Local).await?;
//!
//! // Read the history
//! let entries = store.get_entries().await?;
//! ```
//!
//! # Modules
//!
//! - `store`: Unified entry interface (main entry point)
//! - `models`: Entries, ids and operation outcomes
//! - `shards`: Sharded entry persistence
//! - `order`: Order index and version token
//! - `local`: Local collection snapshot writes
//! - `migration`: One-time move off the legacy single-key layout
//! - `bindings`: Favorites, tags and shortcut commands
//! - `limit`: Local item limit
//! - `expiry`: Time-to-live for local entries
//! - `cloud`: Remote collection client
//! - `badge`: Total-items notifier
//! - `storage`: Key-value backends
//! - `config`: Application configuration

pub mod badge;
pub mod bindings;
pub mod cloud;
pub mod config;
pub mod expiry;
pub mod limit;
pub mod local;
pub mod migration;
pub mod models;
pub mod order;
pub mod shards;
pub mod storage;
pub mod store;

pub use badge::{BadgeNotifier, LogBadge};
pub use bindings::{CommandsStore, EntryCommand, FavoritesStore, TagsStore};
pub use cloud::{CloudDb, CloudEntry, CloudError, MemoryCloud, OfflineCloud};
pub use config::{Backend, Config};
pub use expiry::{LocalTtl, TtlUnit};
pub use migration::MigrationReport;
pub use models::{
    ContentUpdate, CreateOutcome, DeleteOutcome, Entry, EntryId, StorageLocation, ToggleOutcome,
};
pub use storage::{FileKv, KvStore, MemoryKv, SqliteKv, StorageError};
pub use store::{EntryStore, WatchHandle};
