//! Persistence layout for the proxy cache.
//!
//! Each cached value is a pair of keys: the content itself plus a
//! bookkeeping sidecar under `<key>.meta` holding timestamps and, for
//! assets, the content type. A lost sidecar is tolerated: the content is
//! still served and the bookkeeping is reconstructed with defaults.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::meta::now_iso;
use crate::upstream::AssetMeta;
use jute_adapter::{Storage, StorageError};

/// A cached package metadata document, content in storage form.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPackage {
    pub name: String,
    pub content: String,
    /// Upstream `Last-Modified` value captured at fetch time.
    pub last_modified: String,
    /// When this proxy last wrote the entry.
    pub last_refreshed: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedAsset {
    pub path: String,
    pub data: Bytes,
    pub content_type: String,
    pub last_modified: String,
}

#[derive(Serialize, Deserialize)]
struct PackageBookkeeping {
    last_modified: String,
    last_refreshed: String,
}

impl PackageBookkeeping {
    /// Replacement for a missing or unreadable sidecar. Content stays
    /// servable either way.
    fn stand_in() -> Self {
        PackageBookkeeping {
            last_modified: now_iso(),
            last_refreshed: now_iso(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct AssetBookkeeping {
    content_type: String,
    last_modified: String,
}

impl AssetBookkeeping {
    fn stand_in() -> Self {
        AssetBookkeeping {
            content_type: "application/octet-stream".to_string(),
            last_modified: now_iso(),
        }
    }
}

pub struct ProxyStorage<S> {
    inner: S,
}

impl<S: Storage> ProxyStorage<S> {
    pub fn new(inner: S) -> Self {
        ProxyStorage { inner }
    }

    pub async fn get_package(&self, name: &str) -> Result<Option<CachedPackage>> {
        let key = package_key(name);
        let Some(raw) = self.read(&key).await? else {
            return Ok(None);
        };
        let content = String::from_utf8_lossy(&raw).into_owned();

        let bookkeeping = match self.read(&sidecar_key(&key)).await? {
            Some(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
                warn!(package = %name, error = %err, "unreadable bookkeeping sidecar");
                PackageBookkeeping::stand_in()
            }),
            None => {
                warn!(package = %name, "cache entry has no bookkeeping sidecar");
                PackageBookkeeping::stand_in()
            }
        };
        Ok(Some(CachedPackage {
            name: name.to_string(),
            content,
            last_modified: bookkeeping.last_modified,
            last_refreshed: bookkeeping.last_refreshed,
        }))
    }

    pub async fn save_package(&self, entry: &CachedPackage) -> Result<()> {
        let key = package_key(&entry.name);
        let bookkeeping = PackageBookkeeping {
            last_modified: entry.last_modified.clone(),
            last_refreshed: entry.last_refreshed.clone(),
        };
        self.inner
            .put(&key, Bytes::from(entry.content.clone().into_bytes()))
            .await?;
        self.inner
            .put(&sidecar_key(&key), serde_json::to_vec(&bookkeeping)?.into())
            .await?;
        Ok(())
    }

    pub async fn get_asset(&self, path: &str) -> Result<Option<CachedAsset>> {
        let key = asset_key(path);
        let Some(data) = self.read(&key).await? else {
            return Ok(None);
        };

        let bookkeeping = match self.read(&sidecar_key(&key)).await? {
            Some(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
                warn!(asset = %path, error = %err, "unreadable bookkeeping sidecar");
                AssetBookkeeping::stand_in()
            }),
            None => {
                warn!(asset = %path, "cache entry has no bookkeeping sidecar");
                AssetBookkeeping::stand_in()
            }
        };
        Ok(Some(CachedAsset {
            path: path.to_string(),
            data,
            content_type: bookkeeping.content_type,
            last_modified: bookkeeping.last_modified,
        }))
    }

    pub async fn save_asset(&self, path: &str, data: Bytes, meta: &AssetMeta) -> Result<()> {
        let key = asset_key(path);
        let bookkeeping = AssetBookkeeping {
            content_type: meta.content_type.clone(),
            last_modified: meta.last_modified.clone(),
        };
        self.inner.put(&key, data).await?;
        self.inner
            .put(&sidecar_key(&key), serde_json::to_vec(&bookkeeping)?.into())
            .await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        match self.inner.get(key).await {
            Ok(value) => Ok(Some(value)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn package_key(name: &str) -> String {
    format!("{name}/meta.json")
}

fn asset_key(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

fn sidecar_key(key: &str) -> String {
    format!("{key}.meta")
}
