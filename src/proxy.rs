//! Proxy cache orchestrator.
//!
//! Two different freshness policies live here. Package metadata is
//! online-first: every request tries the upstream and falls back to the
//! cache only when the upstream yields nothing, so cached metadata is as
//! fresh as connectivity allows. Assets are cache-first: tarball content is
//! immutable for a given path, so a cached asset is served without touching
//! the network and each asset is fetched from the upstream at most once.

use tracing::{debug, warn};

use crate::error::Result;
use crate::meta::now_iso;
use crate::rewrite;
use crate::upstream::Remote;
use jute_adapter::{SpoolFile, Storage};

mod storage;

pub use storage::{CachedAsset, CachedPackage, ProxyStorage};

pub struct NpmProxy<S, R> {
    storage: ProxyStorage<S>,
    remote: R,
}

impl<S: Storage, R: Remote> NpmProxy<S, R> {
    pub fn new(storage: S, remote: R) -> Self {
        NpmProxy {
            storage: ProxyStorage::new(storage),
            remote,
        }
    }

    /// Loads package metadata, refreshing the cache from the upstream first.
    /// Empty only when the upstream had nothing and the cache has no copy.
    pub async fn get_package(&self, name: &str) -> Result<Option<CachedPackage>> {
        if let Some(refreshed) = self.refresh_package(name).await? {
            return Ok(Some(refreshed));
        }
        let cached = self.storage.get_package(name).await?;
        if cached.is_some() {
            debug!(package = %name, "serving stale cached metadata");
        }
        Ok(cached)
    }

    /// Loads an asset, fetching and caching it on first access. The download
    /// is spooled to a temporary file so a failed or cancelled transfer never
    /// leaves a partial entry in the cache.
    pub async fn get_asset(&self, path: &str) -> Result<Option<CachedAsset>> {
        if let Some(cached) = self.storage.get_asset(path).await? {
            return Ok(Some(cached));
        }

        let mut spool = SpoolFile::create("jute-asset").await?;
        let Some(meta) = self.remote.load_asset(path, spool.file_mut()).await else {
            return Ok(None);
        };
        let data = spool.contents().await?;
        self.storage.save_asset(path, data, &meta).await?;

        self.storage.get_asset(path).await
    }

    pub fn close(&self) {
        self.remote.close();
    }

    /// One upstream round trip. Success overwrites the cached entry with the
    /// document rewritten to storage form; any upstream failure, including an
    /// unparseable body, is treated as a miss.
    async fn refresh_package(&self, name: &str) -> Result<Option<CachedPackage>> {
        let Some(remote) = self.remote.load_package(name).await else {
            return Ok(None);
        };
        let doc = match serde_json::from_str(&remote.content) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(package = %name, error = %err, "upstream sent unparseable metadata");
                return Ok(None);
            }
        };

        let entry = CachedPackage {
            name: name.to_string(),
            content: rewrite::to_storage_form(doc, name).to_string(),
            last_modified: remote.last_modified,
            last_refreshed: now_iso(),
        };
        self.storage.save_package(&entry).await?;
        Ok(Some(entry))
    }
}
