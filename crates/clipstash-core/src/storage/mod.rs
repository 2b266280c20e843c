//! Storage layer
//!
//! The key-value primitive the entry store is built on, and its backends.
//!
//! ## Backends
//!
//! - **MemoryKv**: in-process map (tests, embedding hosts)
//! - **FileKv**: one JSON file per key, atomic writes
//! - **SqliteKv**: single SQLite database file
//!
//! Every backend broadcasts a `KvChange` after each successful write or
//! removal so watchers can react.

pub mod error;
pub mod file;
pub mod kv;
pub mod schema;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use file::FileKv;
pub use kv::{KvChange, KvStore, MemoryKv};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteKv;
