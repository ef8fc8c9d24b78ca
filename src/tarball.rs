//! Reader for uploaded `.tgz` archives.
//!
//! Publish requests carry the tarball as a string, usually base64 but
//! sometimes raw bytes smuggled through a one-byte-per-character string.
//! The reader decodes that, then scans the gzip+tar stream entry by entry,
//! so a member can be pulled out without materializing the whole archive.

use std::ffi::OsStr;
use std::io::{Cursor, Read};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::{Map, Value};
use tar::Archive;

use crate::error::{Error, Result};

const PACKAGE_JSON: &str = "package.json";

/// A `.tgz` archive as submitted by a client. Constructed per upload,
/// consumed to extract a member, then discarded.
pub struct TgzArchive {
    data: String,
    encoded: bool,
}

/// The manifest extracted from an archive's `package.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TgzArchive {
    /// A base64-encoded archive.
    pub fn new(data: String) -> Self {
        Self::with_encoding(data, true)
    }

    pub fn with_encoding(data: String, encoded: bool) -> Self {
        TgzArchive { data, encoded }
    }

    /// The raw archive bytes. Base64 input fails with [`Error::Decode`] when
    /// malformed; raw input is reinterpreted one byte per character, with
    /// characters above U+00FF degrading to `?`.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        if self.encoded {
            Ok(BASE64.decode(self.data.trim())?)
        } else {
            Ok(self
                .data
                .chars()
                .map(|c| {
                    let cp = c as u32;
                    if cp <= 0xFF { cp as u8 } else { b'?' }
                })
                .collect())
        }
    }

    /// Returns the content of the first entry whose final path segment equals
    /// `member`. Unmatched entries are scanned past, never buffered; the
    /// decompressor is dropped on every exit path.
    pub fn extract_member(&self, member: &str) -> Result<Vec<u8>> {
        let bytes = self.bytes()?;
        let gz = GzDecoder::new(Cursor::new(bytes));
        let mut archive = Archive::new(gz);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let matched = entry
                .path()?
                .file_name()
                .is_some_and(|name| name == OsStr::new(member));
            if matched {
                // The declared entry size is client-controlled; let the read
                // grow the buffer instead of preallocating it.
                let mut content = Vec::new();
                entry.read_to_end(&mut content)?;
                return Ok(content);
            }
        }
        Err(Error::MemberNotFound(member.to_string()))
    }

    /// Parses the archive's `package.json` into a [`PackageDescriptor`].
    pub fn package_descriptor(&self) -> Result<PackageDescriptor> {
        let raw = self.extract_member(PACKAGE_JSON)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn tgz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn as_raw_string(bytes: &[u8]) -> String {
        bytes.iter().map(|&b| b as char).collect()
    }

    #[test]
    fn extracts_member_by_final_path_segment() {
        let bytes = tgz(&[
            ("pkg/index.js", b"module.exports = 1;"),
            ("pkg/package.json", br#"{"name":"pkg","version":"1.0.0"}"#),
        ]);
        let archive = TgzArchive::new(BASE64.encode(&bytes));

        let content = archive.extract_member("package.json").unwrap();
        assert_eq!(content, br#"{"name":"pkg","version":"1.0.0"}"#);
    }

    #[test]
    fn missing_member_fails_with_member_not_found() {
        let bytes = tgz(&[
            ("pkg/index.js", b"module.exports = 1;"),
            ("pkg/package.json", br#"{"name":"pkg","version":"1.0.0"}"#),
        ]);
        let archive = TgzArchive::new(BASE64.encode(&bytes));

        let err = archive.extract_member("missing.json").unwrap_err();
        assert!(matches!(err, Error::MemberNotFound(name) if name == "missing.json"));
    }

    #[test]
    fn first_match_wins() {
        let bytes = tgz(&[
            ("pkg/package.json", b"first"),
            ("pkg/nested/package.json", b"second"),
        ]);
        let archive = TgzArchive::new(BASE64.encode(&bytes));
        assert_eq!(archive.extract_member("package.json").unwrap(), b"first");
    }

    #[test]
    fn malformed_base64_fails_with_decode_error() {
        let archive = TgzArchive::new("this is !!! not base64".to_string());
        assert!(matches!(archive.bytes().unwrap_err(), Error::Decode(_)));
    }

    #[test]
    fn raw_encoding_maps_one_byte_per_character() {
        let bytes = tgz(&[("pkg/package.json", br#"{"name":"p","version":"0.1.0"}"#)]);
        let archive = TgzArchive::with_encoding(as_raw_string(&bytes), false);

        assert_eq!(archive.bytes().unwrap(), bytes);
        let descriptor = archive.package_descriptor().unwrap();
        assert_eq!(descriptor.name, "p");
        assert_eq!(descriptor.version, "0.1.0");
    }

    #[test]
    fn raw_encoding_degrades_wide_characters_to_question_marks() {
        let archive = TgzArchive::with_encoding("a\u{00FF}\u{0100}€".to_string(), false);
        assert_eq!(archive.bytes().unwrap(), vec![b'a', 0xFF, b'?', b'?']);
    }

    // Header declares more data than the stream carries; the read must not
    // size a buffer from the declared length.
    #[test]
    fn entry_with_huge_declared_size_is_read_without_preallocation() {
        let mut header = tar::Header::new_gnu();
        header.set_path("package/package.json").unwrap();
        header.set_size(u64::MAX / 2);
        header.set_mode(0o644);
        header.set_cksum();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut encoder, header.as_bytes()).unwrap();
        let bytes = encoder.finish().unwrap();

        let archive = TgzArchive::new(BASE64.encode(&bytes));
        let content = archive.extract_member("package.json").unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn package_descriptor_parses_manifest() {
        let manifest = br#"{"name":"@scope/pkg","version":"2.1.0","description":"d"}"#;
        let bytes = tgz(&[("package/package.json", manifest)]);
        let archive = TgzArchive::new(BASE64.encode(&bytes));

        let descriptor = archive.package_descriptor().unwrap();
        assert_eq!(descriptor.name, "@scope/pkg");
        assert_eq!(descriptor.version, "2.1.0");
        assert_eq!(descriptor.extra["description"], "d");
    }

    #[test]
    fn invalid_manifest_json_fails_with_parse_error() {
        let bytes = tgz(&[("package/package.json", b"{not json")]);
        let archive = TgzArchive::new(BASE64.encode(&bytes));
        assert!(matches!(
            archive.package_descriptor().unwrap_err(),
            Error::Parse(_)
        ));
    }

    #[test]
    fn truncated_gzip_stream_surfaces_io_error() {
        let mut bytes = tgz(&[("pkg/package.json", br#"{"name":"p","version":"1"}"#)]);
        bytes.truncate(bytes.len() / 2);
        let archive = TgzArchive::new(BASE64.encode(&bytes));
        assert!(matches!(
            archive.extract_member("package.json").unwrap_err(),
            Error::Io(_)
        ));
    }
}
