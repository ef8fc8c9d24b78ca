use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_PATH: &str = "./packages";

/// Root directory for cached and published package content. Storage keys map
/// onto paths below it; creating the directory is the filesystem backend's
/// job (`FilesystemStorage::prepare`), not the config layer's.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: PathBuf::from(DEFAULT_PATH),
        }
    }
}

impl StorageConfig {
    /// Anchors a relative `path` to the directory the configuration file was
    /// read from, so the on-disk layout does not move with the process
    /// working directory.
    pub fn resolve_relative_to(&mut self, base_dir: &Path) {
        if self.path.is_relative() {
            self.path = base_dir.join(&self.path);
        }
    }
}
