//! File-per-key persistence
//!
//! Each key is stored as its own JSON file inside a directory. Writes are
//! atomic (write to temp file, sync, rename) so a crash never leaves a
//! half-written value behind.
//!
//! Storage location: `~/.local/share/clipstash/kv/` (configurable via `Config`)

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::kv::{KvChange, KvStore, CHANGE_CHANNEL_CAPACITY};

const VALUE_EXTENSION: &str = "json";

/// Directory-backed key-value store
pub struct FileKv {
    dir: PathBuf,
    changes: broadcast::Sender<KvChange>,
}

impl FileKv {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::CreateDirectory {
            path: dir.clone(),
            source,
        })?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { dir, changes })
    }

    /// Path of the file holding `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_key(key), VALUE_EXTENSION))
    }

    fn notify(&self, key: &str) {
        let _ = self.changes.send(KvChange {
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::ReadError { path, source }),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::invalid_value(key, e))
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let bytes = serde_json::to_vec(&value).map_err(|e| StorageError::invalid_value(key, e))?;
        atomic_write(&self.path_for(key), &bytes).await?;
        self.notify(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                self.notify(key);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, path)),
        }
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|source| StorageError::ReadError {
                path: self.dir.clone(),
                source,
            })?;

        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXTENSION) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_key)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}

/// Write data to a file atomically
///
/// 1. Write to a uniquely named temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// Concurrent writers of one key each get their own temp file; the last
/// rename wins.
async fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let temp_path = temp_path_for(path);

    if let Err(e) = write_synced(&temp_path, data).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(source) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::AtomicWriteFailed {
            from: temp_path,
            to: path.to_path_buf(),
            source,
        });
    }

    Ok(())
}

async fn write_synced(temp_path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|e| StorageError::from_io(e, temp_path.to_path_buf()))?;

    file.write_all(data)
        .await
        .map_err(|e| StorageError::write(e, temp_path.to_path_buf()))?;

    file.sync_all()
        .await
        .map_err(|e| StorageError::write(e, temp_path.to_path_buf()))
}

/// `<stem>.<random>.tmp` next to `path`; `keys()` skips it
fn temp_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("value");
    path.with_file_name(format!("{}.{}.tmp", stem, Uuid::new_v4().simple()))
}

/// Make a key safe to use as a file name
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes `%XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_key_encoding() {
        assert_eq!(encode_key("entryOrderV1"), "entryOrderV1");
        assert_eq!(encode_key("entryBucketV1:ab12cd34"), "entryBucketV1%3Aab12cd34");
        assert_eq!(
            decode_key("entryBucketV1%3Aab12cd34").as_deref(),
            Some("entryBucketV1:ab12cd34")
        );
        assert!(decode_key("bad%Z").is_none());
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let temp_dir = TempDir::new().unwrap();
        let kv = FileKv::open(temp_dir.path().join("kv")).unwrap();

        assert!(kv.get("entryOrderV1").await.unwrap().is_none());

        kv.set("entryOrderV1", json!(["a", "b"])).await.unwrap();
        assert!(kv.path_for("entryOrderV1").exists());
        assert_eq!(
            kv.get("entryOrderV1").await.unwrap(),
            Some(json!(["a", "b"]))
        );

        kv.remove("entryOrderV1").await.unwrap();
        assert!(!kv.path_for("entryOrderV1").exists());
        // Second remove is a no-op
        kv.remove("entryOrderV1").await.unwrap();
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("kv");

        {
            let kv = FileKv::open(&dir).unwrap();
            kv.set("entryBucketV1:0000abcd", json!({"x": 1}))
                .await
                .unwrap();
        }

        let kv = FileKv::open(&dir).unwrap();
        assert_eq!(
            kv.get("entryBucketV1:0000abcd").await.unwrap(),
            Some(json!({"x": 1}))
        );
        assert_eq!(kv.keys().await.unwrap(), vec!["entryBucketV1:0000abcd"]);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let kv = FileKv::open(temp_dir.path()).unwrap();

        for i in 0..5 {
            kv.set("entryVersionV1", json!(format!("v{}", i)))
                .await
                .unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["entryVersionV1.json"]);
    }

    #[tokio::test]
    async fn test_corrupt_file_reports_invalid_value() {
        let temp_dir = TempDir::new().unwrap();
        let kv = FileKv::open(temp_dir.path()).unwrap();
        std::fs::write(kv.path_for("entryOrderV1"), b"{not json").unwrap();

        let err = kv.get("entryOrderV1").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_changes_are_broadcast() {
        let temp_dir = TempDir::new().unwrap();
        let kv = FileKv::open(temp_dir.path()).unwrap();
        let mut rx = kv.subscribe();

        kv.set("entryVersionV1", json!("1")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().key, "entryVersionV1");
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let target = Path::new("/data/kv/entryVersionV1.json");
        let a = temp_path_for(target);
        let b = temp_path_for(target);

        assert_ne!(a, b);
        assert_eq!(a.parent(), target.parent());
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("tmp"));
        assert!(a
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("entryVersionV1.")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_on_one_key() {
        let temp_dir = TempDir::new().unwrap();
        let kv = std::sync::Arc::new(FileKv::open(temp_dir.path()).unwrap());

        let writers: Vec<_> = (0..50)
            .map(|i| {
                let kv = kv.clone();
                tokio::spawn(async move { kv.set("entryVersionV1", json!(i)).await })
            })
            .collect();

        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let value = kv.get("entryVersionV1").await.unwrap().unwrap();
        assert!(value.as_i64().is_some_and(|n| (0..50).contains(&n)));
        assert_eq!(kv.keys().await.unwrap(), vec!["entryVersionV1"]);

        let leftovers = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
