//! File-backed store.
//!
//! The whole key space is kept in memory and written out as one JSON document
//! on every mutation. Writes go to a temp file in the same directory which is
//! then renamed over the target, so a crash mid-write leaves the previous
//! contents intact.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{KvStore, StoreError};

const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: BTreeMap<String, Value>,
}

/// JSON-file store with atomic replace-on-write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Opens the store at `path`, creating an empty one if the file is missing.
    ///
    /// # Errors
    ///
    /// - `StoreError::Corrupt` if the file exists but cannot be parsed
    /// - `StoreError::Io` if the file cannot be read
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let read_path = path.clone();

        let entries = tokio::task::spawn_blocking(move || read_store_file(&read_path))
            .await
            .map_err(|e| StoreError::Io {
                path: path.clone(),
                message: e.to_string(),
            })??;

        info!(path = %path.display(), keys = entries.len(), "Store opened");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `entries` to disk. The in-memory map is only replaced by the
    /// caller after this succeeds.
    async fn commit(&self, entries: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let file = StoreFile {
            version: STORE_FORMAT_VERSION,
            entries: entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| StoreError::Serde {
            key: "<store>".to_string(),
            message: e.to_string(),
        })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io {
                path: self.path.clone(),
                message: e.to_string(),
            })??;

        debug!(path = %self.path.display(), keys = entries.len(), "Store committed");
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.commit(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.commit(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        Ok(self.entries.lock().await.clone())
    }
}

fn read_store_file(path: &Path) -> Result<BTreeMap<String, Value>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let file: StoreFile = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if file.version != STORE_FORMAT_VERSION {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            message: format!("unsupported store version {}", file.version),
        });
    }

    Ok(file.entries)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |e: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_err)?;

    let mut temp = NamedTempFile::new_in(parent).map_err(io_err)?;
    temp.write_all(bytes).map_err(io_err)?;
    temp.flush().map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|e| io_err(e.error))?;

    Ok(())
}
