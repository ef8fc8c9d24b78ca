//! Transforms between the stored and the client-facing form of a package
//! metadata document.
//!
//! Cached metadata keeps tarball references host-agnostic so that one stored
//! copy can serve clients reaching the registry under any hostname or alias.
//! Both transforms walk the full `versions` map, touch nothing but
//! `dist.tarball`, and are idempotent under repeated application with the
//! same target.

use serde_json::Value;

/// Rewrites every `versions.*.dist.tarball` URL to the storage-relative form
/// `/{name}/-/{name}-{version}.tgz`, discarding the upstream host.
pub fn to_storage_form(mut doc: Value, name: &str) -> Value {
    if let Some(versions) = doc.get_mut("versions").and_then(Value::as_object_mut) {
        for (version, entry) in versions.iter_mut() {
            if let Some(dist) = entry.get_mut("dist").and_then(Value::as_object_mut)
                && dist.contains_key("tarball")
            {
                dist.insert(
                    "tarball".to_string(),
                    Value::String(format!("/{name}/-/{name}-{version}.tgz")),
                );
            }
        }
    }
    doc
}

/// Rewrites every stored relative tarball path to `{base_url}{path}` so that
/// tarball links point back at the registry the client is talking to.
/// Absolute URLs are left alone.
pub fn to_client_form(mut doc: Value, base_url: &str) -> Value {
    let base = base_url.trim_end_matches('/');
    if let Some(versions) = doc.get_mut("versions").and_then(Value::as_object_mut) {
        for entry in versions.values_mut() {
            if let Some(dist) = entry.get_mut("dist").and_then(Value::as_object_mut)
                && let Some(path) = dist.get("tarball").and_then(Value::as_str)
                && path.starts_with('/')
            {
                let absolute = format!("{base}{path}");
                dist.insert("tarball".to_string(), Value::String(absolute));
            }
        }
    }
    doc
}
