use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no value for key '{0}'")]
    NotFound(String),
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract key/value storage. Keys are slash-separated relative paths;
/// values are opaque byte blobs. Writes are last-writer-wins per key.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Fails with [`StorageError::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: Storage + ?Sized> Storage for std::sync::Arc<T> {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        (**self).exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        (**self).put(key, value).await
    }
}

/// Map-backed storage for tests and embedded use.
#[derive(Default)]
pub struct InMemoryStorage {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
