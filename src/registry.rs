//! Publish-side registry flows: publish, dist-tag edits, deprecation.
//!
//! Each flow reads the stored record, computes the next one through the pure
//! functions in [`crate::meta`], and replaces the stored record whole. There
//! is no compare-and-swap; concurrent writers are last-writer-wins, same as
//! the storage layer underneath.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::meta::{self, PackageRecord, UploadFragment, VersionEntry};
use crate::rewrite;
use crate::tarball::TgzArchive;
use jute_adapter::{Storage, StorageError};

#[cfg(test)]
mod tests;

/// The body of an `npm deprecate` call. Same shape as a publish fragment,
/// but only the `deprecated` field of each version is honored.
#[derive(Debug, Deserialize)]
struct DeprecationRequest {
    #[serde(default)]
    versions: BTreeMap<String, VersionEntry>,
}

pub struct Registry<S> {
    storage: S,
}

impl<S: Storage> Registry<S> {
    pub fn new(storage: S) -> Self {
        Registry { storage }
    }

    /// Handles one `npm publish` body: validates and stores the attached
    /// tarballs, stamps each matching version's dist block with the stored
    /// path and SHA-1 checksum, then merges the fragment into the record.
    pub async fn publish(&self, body: &str) -> Result<PackageRecord> {
        let mut upload: UploadFragment = serde_json::from_str(body)?;
        if upload.versions.is_empty() {
            return Err(Error::InvalidUpload("no versions in upload".to_string()));
        }

        let attachments = std::mem::take(&mut upload.attachments);
        let mut stored = 0usize;
        for (filename, attachment) in attachments {
            if !filename.ends_with(".tgz") {
                warn!(package = %upload.name, attachment = %filename, "skipping non-tarball attachment");
                continue;
            }
            self.store_tarball(&mut upload, &filename, attachment.data)
                .await?;
            stored += 1;
        }
        if stored == 0 {
            return Err(Error::InvalidUpload(
                "no tarball attachment in upload".to_string(),
            ));
        }

        let existing = self.load_record(&upload.name).await?;
        let record = meta::merge(existing, &upload);
        self.save_record(&record).await?;
        info!(
            package = %record.name,
            versions = record.versions.len(),
            "published package"
        );
        Ok(record)
    }

    pub async fn get_record(&self, name: &str) -> Result<Option<PackageRecord>> {
        self.load_record(name).await
    }

    /// The stored record rewritten for a client: tarball paths made absolute
    /// against `base_url`.
    pub async fn client_document(&self, name: &str, base_url: &str) -> Result<Option<Value>> {
        match self.load_record(name).await? {
            Some(record) => {
                let doc = serde_json::to_value(&record)?;
                Ok(Some(rewrite::to_client_form(doc, base_url)))
            }
            None => Ok(None),
        }
    }

    /// Serves a previously published tarball.
    pub async fn get_tarball(&self, name: &str, filename: &str) -> Result<Option<Bytes>> {
        match self.storage.get(&tarball_key(name, filename)).await {
            Ok(data) => Ok(Some(data)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn add_dist_tag(
        &self,
        name: &str,
        tag: &str,
        version: &str,
    ) -> Result<PackageRecord> {
        let record = self.require_record(name).await?;
        let record = meta::set_tag(record, tag, version);
        self.save_record(&record).await?;
        Ok(record)
    }

    pub async fn delete_dist_tag(&self, name: &str, tag: &str) -> Result<PackageRecord> {
        let record = self.require_record(name).await?;
        let record = meta::delete_tag(record, tag)?;
        self.save_record(&record).await?;
        Ok(record)
    }

    /// Handles an `npm deprecate` body: copies deprecation messages onto the
    /// record's matching versions.
    pub async fn deprecate(&self, name: &str, body: &str) -> Result<PackageRecord> {
        let request: DeprecationRequest = serde_json::from_str(body)?;
        let record = self.require_record(name).await?;
        let record = meta::apply_deprecations(record, &request.versions);
        self.save_record(&record).await?;
        Ok(record)
    }

    /// Decodes one attachment, stores it, and stamps the upload's matching
    /// version entry. A manifest naming a different package is logged but
    /// accepted; clients own the upload's name field.
    async fn store_tarball(
        &self,
        upload: &mut UploadFragment,
        filename: &str,
        data: String,
    ) -> Result<()> {
        let archive = TgzArchive::new(data);
        let descriptor = archive.package_descriptor()?;
        if descriptor.name != upload.name {
            warn!(
                package = %upload.name,
                manifest = %descriptor.name,
                "archive manifest names a different package"
            );
        }

        let bytes = archive.bytes()?;
        let shasum = hex::encode(Sha1::digest(&bytes));
        let key = tarball_key(&upload.name, filename);
        self.storage.put(&key, Bytes::from(bytes)).await?;

        match upload.versions.get_mut(&descriptor.version) {
            Some(entry) => {
                let dist = entry.dist.get_or_insert_with(Default::default);
                dist.tarball = Some(format!("/{key}"));
                dist.shasum = Some(shasum);
            }
            None => warn!(
                package = %upload.name,
                version = %descriptor.version,
                "archive version is not in the uploaded versions map"
            ),
        }
        Ok(())
    }

    async fn load_record(&self, name: &str) -> Result<Option<PackageRecord>> {
        match self.storage.get(&record_key(name)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn require_record(&self, name: &str) -> Result<PackageRecord> {
        self.load_record(name)
            .await?
            .ok_or_else(|| Error::PackageNotFound(name.to_string()))
    }

    async fn save_record(&self, record: &PackageRecord) -> Result<()> {
        self.storage
            .put(&record_key(&record.name), serde_json::to_vec(record)?.into())
            .await?;
        Ok(())
    }
}

fn record_key(name: &str) -> String {
    format!("{name}/meta.json")
}

fn tarball_key(name: &str, filename: &str) -> String {
    format!("{name}/-/{filename}")
}
