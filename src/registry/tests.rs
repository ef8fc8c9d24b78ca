use super::*;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use std::sync::Arc;

use jute_adapter::InMemoryStorage;

fn tgz(manifest: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "package/package.json", manifest.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn publish_body(name: &str, version: &str, tarball: &[u8]) -> String {
    let mut body = json!({
        "name": name,
        "versions": {},
        "_attachments": {}
    });
    body["versions"][version] = json!({});
    body["_attachments"][&format!("{name}-{version}.tgz")] = json!({
        "data": BASE64.encode(tarball),
        "content_type": "application/octet-stream",
        "length": tarball.len(),
    });
    body.to_string()
}

fn registry() -> Registry<Arc<InMemoryStorage>> {
    Registry::new(Arc::new(InMemoryStorage::new()))
}

#[tokio::test]
async fn test_publish_stores_tarball_and_record() {
    let registry = registry();
    let tarball = tgz(r#"{"name":"asdf","version":"1.0.0"}"#);
    let expected_shasum = hex::encode(Sha1::digest(&tarball));

    let record = registry
        .publish(&publish_body("asdf", "1.0.0", &tarball))
        .await
        .unwrap();

    assert_eq!(record.name, "asdf");
    assert_eq!(record.dist_tags["latest"], "1.0.0");
    let dist = record.versions["1.0.0"].dist.as_ref().unwrap();
    assert_eq!(dist.tarball.as_deref(), Some("/asdf/-/asdf-1.0.0.tgz"));
    assert_eq!(dist.shasum.as_deref(), Some(expected_shasum.as_str()));

    let stored = registry
        .get_tarball("asdf", "asdf-1.0.0.tgz")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.as_ref(), tarball.as_slice());

    let reread = registry.get_record("asdf").await.unwrap().unwrap();
    assert_eq!(reread.dist_tags["latest"], "1.0.0");
}

#[tokio::test]
async fn test_client_document_prefixes_tarball_paths() {
    let registry = registry();
    let tarball = tgz(r#"{"name":"asdf","version":"1.0.0"}"#);
    registry
        .publish(&publish_body("asdf", "1.0.0", &tarball))
        .await
        .unwrap();

    let doc = registry
        .client_document("asdf", "http://localhost:8346")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        doc.pointer("/versions/1.0.0/dist/tarball").unwrap(),
        "http://localhost:8346/asdf/-/asdf-1.0.0.tgz"
    );

    assert!(
        registry
            .client_document("ghost", "http://localhost:8346")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_second_publish_merges_into_record() {
    let registry = registry();
    let first = tgz(r#"{"name":"asdf","version":"1.0.0"}"#);
    let second = tgz(r#"{"name":"asdf","version":"1.0.1"}"#);

    registry
        .publish(&publish_body("asdf", "1.0.0", &first))
        .await
        .unwrap();
    let record = registry
        .publish(&publish_body("asdf", "1.0.1", &second))
        .await
        .unwrap();

    assert_eq!(record.versions.len(), 2);
    assert_eq!(record.dist_tags["latest"], "1.0.1");
    assert!(record.time.contains_key("1.0.0"));
    assert!(record.time.contains_key("1.0.1"));
}

#[tokio::test]
async fn test_publish_without_versions_is_rejected() {
    let registry = registry();
    let body = json!({ "name": "asdf", "versions": {}, "_attachments": {} }).to_string();
    assert!(matches!(
        registry.publish(&body).await.unwrap_err(),
        Error::InvalidUpload(_)
    ));
}

#[tokio::test]
async fn test_publish_without_tarball_attachment_is_rejected() {
    let registry = registry();
    let body = json!({
        "name": "asdf",
        "versions": { "1.0.0": {} },
        "_attachments": { "readme.txt": { "data": "aGk=" } }
    })
    .to_string();
    assert!(matches!(
        registry.publish(&body).await.unwrap_err(),
        Error::InvalidUpload(_)
    ));
}

#[tokio::test]
async fn test_publish_with_malformed_archive_fails() {
    let registry = registry();
    let body = json!({
        "name": "asdf",
        "versions": { "1.0.0": {} },
        "_attachments": { "asdf-1.0.0.tgz": { "data": "!!! not base64 !!!" } }
    })
    .to_string();
    assert!(matches!(
        registry.publish(&body).await.unwrap_err(),
        Error::Decode(_)
    ));
}

#[tokio::test]
async fn test_publish_accepts_mismatched_manifest_name() {
    let registry = registry();
    let tarball = tgz(r#"{"name":"other","version":"1.0.0"}"#);
    let record = registry
        .publish(&publish_body("asdf", "1.0.0", &tarball))
        .await
        .unwrap();
    assert_eq!(record.name, "asdf");
}

#[tokio::test]
async fn test_dist_tag_add_and_delete_round_trip() {
    let registry = registry();
    let tarball = tgz(r#"{"name":"asdf","version":"1.0.0"}"#);
    registry
        .publish(&publish_body("asdf", "1.0.0", &tarball))
        .await
        .unwrap();

    let record = registry.add_dist_tag("asdf", "beta", "1.0.0").await.unwrap();
    assert_eq!(record.dist_tags["beta"], "1.0.0");

    let record = registry.delete_dist_tag("asdf", "beta").await.unwrap();
    assert!(!record.dist_tags.contains_key("beta"));

    assert!(matches!(
        registry.delete_dist_tag("asdf", "beta").await.unwrap_err(),
        Error::TagNotFound(tag) if tag == "beta"
    ));
}

#[tokio::test]
async fn test_dist_tag_edit_on_unknown_package_fails() {
    let registry = registry();
    assert!(matches!(
        registry.add_dist_tag("ghost", "beta", "1.0.0").await.unwrap_err(),
        Error::PackageNotFound(name) if name == "ghost"
    ));
    assert!(matches!(
        registry.delete_dist_tag("ghost", "beta").await.unwrap_err(),
        Error::PackageNotFound(_)
    ));
}

#[tokio::test]
async fn test_deprecate_marks_published_version() {
    let registry = registry();
    let tarball = tgz(r#"{"name":"asdf","version":"1.0.0"}"#);
    registry
        .publish(&publish_body("asdf", "1.0.0", &tarball))
        .await
        .unwrap();

    let body = json!({
        "versions": { "1.0.0": { "deprecated": "use qwer instead" } }
    })
    .to_string();
    let record = registry.deprecate("asdf", &body).await.unwrap();
    assert_eq!(
        record.versions["1.0.0"].deprecated.as_deref(),
        Some("use qwer instead")
    );
}

#[tokio::test]
async fn test_deprecate_unknown_package_fails() {
    let registry = registry();
    let body = json!({ "versions": {} }).to_string();
    assert!(matches!(
        registry.deprecate("ghost", &body).await.unwrap_err(),
        Error::PackageNotFound(_)
    ));
}
