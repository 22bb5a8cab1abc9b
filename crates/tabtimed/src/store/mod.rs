//! Key-value persistence for day records and tracking state.
//!
//! The store is the only resource shared between the session pipeline, the
//! retention sweeper and UI reads. Individual operations are atomic, but a
//! read followed by a write is not: callers that merge into an existing
//! value must serialize themselves (see [`crate::writer::DurableWriter`]).
//!
//! # Layout
//!
//! | Key | Value |
//! |---|---|
//! | `YYYY-MM-DD` | [`DayRecord`](tabtime_core::DayRecord) |
//! | `is_tracking` | `bool` |
//! | `auto_resume_timer` | [`AutoResumeTimer`](tabtime_core::AutoResumeTimer) |
//! | `cleanup_metadata` | [`CleanupMetadata`](tabtime_core::CleanupMetadata) |

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("store I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The backing file exists but is not a valid store
    #[error("store file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// A value could not be encoded or decoded
    #[error("failed to (de)serialize {key}: {message}")]
    Serde { key: String, message: String },

    /// The store refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn serde(key: &str, err: serde_json::Error) -> Self {
        Self::Serde {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

/// Asynchronous key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Stores `value` under `key`, replacing what was there.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Removes `key`. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Returns every key and value.
    async fn get_all(&self) -> Result<BTreeMap<String, Value>, StoreError>;
}

/// Reads and decodes a typed value.
pub async fn load<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::serde(key, e)),
        None => Ok(None),
    }
}

/// Encodes and writes a typed value.
pub async fn save<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|e| StoreError::serde(key, e))?;
    store.set(key, value).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabtime_core::{normalize, DayRecord};

    #[tokio::test]
    async fn test_load_save_typed() {
        let store = MemoryStore::new();
        let mut record = DayRecord::new();
        record.add(&normalize("https://a.com/"), 5_000);

        save(&store, "2024-01-01", &record).await.unwrap();
        let back: Option<DayRecord> = load(&store, "2024-01-01").await.unwrap();

        assert_eq!(back, Some(record));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let store = MemoryStore::new();
        let value: Option<bool> = load(&store, "is_tracking").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_load_wrong_shape_is_serde_error() {
        let store = MemoryStore::new();
        store
            .set("is_tracking", serde_json::json!("yes"))
            .await
            .unwrap();

        let result: Result<Option<bool>, _> = load(&store, "is_tracking").await;
        assert!(matches!(result, Err(StoreError::Serde { .. })));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Io {
            path: PathBuf::from("/tmp/store.json"),
            message: "disk full".to_string(),
        };
        assert!(err.to_string().contains("/tmp/store.json"));
        assert!(err.to_string().contains("disk full"));
    }
}
