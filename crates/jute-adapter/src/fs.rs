use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};

use crate::storage::{Storage, StorageError};

/// Directory-backed storage. Keys map onto relative paths below the root;
/// writes go through a sibling temp file and an atomic rename.
#[derive(Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: PathBuf) -> Self {
        FilesystemStorage { root }
    }

    pub async fn prepare(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn checked_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let unsafe_key = key.is_empty()
            || key.contains('\\')
            || key
                .split('/')
                .any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if unsafe_key {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.resolve(key))
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.checked_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.checked_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        let path = self.checked_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = temp_path_for(&path);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        if let Err(e) = write_and_rename(&mut file, &tmp_path, &path, &value).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }
}

async fn write_and_rename(
    file: &mut File,
    tmp_path: &Path,
    final_path: &Path,
    value: &[u8],
) -> std::io::Result<()> {
    file.write_all(value).await?;
    file.flush().await?;
    fs::rename(tmp_path, final_path).await
}

/// A scoped temp file for spooling a streamed download before it is handed
/// to storage. The file is removed when the spool is dropped, whichever way
/// the surrounding operation ends.
pub struct SpoolFile {
    path: PathBuf,
    file: File,
}

impl SpoolFile {
    pub async fn create(prefix: &str) -> Result<Self, StorageError> {
        let path = std::env::temp_dir().join(unique_name(prefix));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .await?;
        Ok(SpoolFile { path, file })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Flushes and reads back everything written so far.
    pub async fn contents(&mut self) -> Result<Bytes, StorageError> {
        self.file.flush().await?;
        let data = fs::read(&self.path).await?;
        Ok(Bytes::from(data))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove spool file");
        }
    }
}

fn unique_name(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = std::process::id();
    format!("{prefix}-{pid}-{timestamp}.tmp")
}

fn temp_path_for(final_path: &Path) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = std::process::id();
    let tmp_name = match final_path.file_name().and_then(|s| s.to_str()) {
        Some(name) => format!("{name}.tmp-{pid}-{timestamp}"),
        None => format!("tmp-{pid}-{timestamp}"),
    };
    final_path.with_file_name(tmp_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_creates_root_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("packages");
        let storage = FilesystemStorage::new(root.clone());

        assert!(!root.exists());
        storage.prepare().await.unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_get_missing_key_fails_with_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path().to_path_buf());

        let err = storage.get("lodash/meta.json").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_put_creates_nested_dirs_and_round_trips() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path().to_path_buf());
        storage.prepare().await.unwrap();

        storage
            .put("@types/node/meta.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert!(storage.exists("@types/node/meta.json").await.unwrap());
        assert_eq!(
            storage.get("@types/node/meta.json").await.unwrap(),
            Bytes::from_static(b"{}")
        );
    }

    #[tokio::test]
    async fn test_put_leaves_no_temp_file_behind() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path().to_path_buf());
        storage.prepare().await.unwrap();

        storage.put("a.tgz", Bytes::from_static(b"data")).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.tgz".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path().to_path_buf());

        for key in ["../escape", "a/../b", "", "a//b", "a\\b"] {
            let err = storage.exists(key).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "key: {key}");
        }
    }

    #[tokio::test]
    async fn test_spool_file_removed_on_drop() {
        let mut spool = SpoolFile::create("jute-test").await.unwrap();
        spool.file_mut().write_all(b"partial").await.unwrap();
        let path = spool.path().to_path_buf();
        assert!(path.exists());

        drop(spool);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_spool_contents_returns_written_bytes() {
        let mut spool = SpoolFile::create("jute-test").await.unwrap();
        spool.file_mut().write_all(b"tarball bytes").await.unwrap();
        assert_eq!(
            spool.contents().await.unwrap(),
            Bytes::from_static(b"tarball bytes")
        );
    }
}
