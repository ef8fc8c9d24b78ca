//! npm registry metadata documents and the merge engine.
//!
//! A package's registry record (`meta.json`) evolves through three
//! transitions: publish, dist-tag add/delete, and deprecation. All three are
//! pure functions here; reading and replacing the stored record is the
//! caller's job, and callers must replace the record whole rather than patch
//! it in place.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};


pub const LATEST: &str = "latest";

/// The full registry record for one package, in npm wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionEntry>,
    #[serde(default)]
    pub time: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One published version. Immutable once written except for `deprecated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<DistInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The JSON body of one `npm publish` call: new versions, optional dist-tags
/// and readme, and base64 tarball attachments.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadFragment {
    pub name: String,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionEntry>,
    #[serde(default)]
    pub readme: Option<String>,
    #[serde(rename = "_attachments", default)]
    pub attachments: BTreeMap<String, Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub data: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub length: Option<u64>,
}

/// Computes the next record for a publish. Upload entries win version
/// collisions; dist-tags are merged key by key. When the upload carries no
/// dist-tags at all, `latest` is pointed at the lexicographically greatest
/// uploaded version string (plain string order, no semver).
pub fn merge(existing: Option<PackageRecord>, upload: &UploadFragment) -> PackageRecord {
    let now = now_iso();
    let mut record = match existing {
        Some(record) => record,
        None => skeleton(upload, &now),
    };

    for (version, entry) in &upload.versions {
        record.versions.insert(version.clone(), entry.clone());
    }
    for (tag, version) in &upload.dist_tags {
        record.dist_tags.insert(tag.clone(), version.clone());
    }
    if upload.dist_tags.is_empty()
        && let Some(greatest) = upload.versions.keys().next_back()
    {
        record.dist_tags.insert(LATEST.to_string(), greatest.clone());
    }
    if let Some(readme) = &upload.readme {
        record.readme = Some(readme.clone());
    }

    record
        .time
        .entry("created".to_string())
        .or_insert_with(|| now.clone());
    record.time.insert("modified".to_string(), now.clone());
    for version in record.versions.keys() {
        if !record.time.contains_key(version) {
            record.time.insert(version.clone(), now.clone());
        }
    }

    record
}

/// Upserts a dist-tag; applying the same tag twice yields the same record.
pub fn set_tag(mut record: PackageRecord, tag: &str, version: &str) -> PackageRecord {
    record.dist_tags.insert(tag.to_string(), version.to_string());
    record
}

pub fn delete_tag(mut record: PackageRecord, tag: &str) -> Result<PackageRecord> {
    if record.dist_tags.remove(tag).is_none() {
        return Err(Error::TagNotFound(tag.to_string()));
    }
    Ok(record)
}

/// Copies `deprecated` messages from the submitted versions map onto matching
/// record versions. Versions unknown to the record are skipped: clients may
/// deprecate a version in the same call that introduces it, in which case the
/// publish path has already merged the field.
pub fn apply_deprecations(
    mut record: PackageRecord,
    versions: &BTreeMap<String, VersionEntry>,
) -> PackageRecord {
    for (version, submitted) in versions {
        if let Some(message) = &submitted.deprecated
            && let Some(entry) = record.versions.get_mut(version)
        {
            entry.deprecated = Some(message.clone());
        }
    }
    record
}

fn skeleton(upload: &UploadFragment, now: &str) -> PackageRecord {
    let mut extra = Map::new();
    extra.insert("_id".to_string(), Value::String(upload.name.clone()));
    let mut dist_tags = upload.dist_tags.clone();
    if !dist_tags.contains_key(LATEST)
        && let Some(greatest) = upload.versions.keys().next_back()
    {
        dist_tags.insert(LATEST.to_string(), greatest.clone());
    }
    PackageRecord {
        name: upload.name.clone(),
        dist_tags,
        versions: BTreeMap::new(),
        time: BTreeMap::from([("created".to_string(), now.to_string())]),
        readme: upload.readme.clone(),
        extra,
    }
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
