use thiserror::Error;

/// Failure taxonomy for registry operations. Archive and metadata problems
/// surface to the client as bad-request errors; lookup misses surface as
/// not-found. Upstream transport failures never appear here at all, they
/// collapse to empty results inside the remote client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed base64 archive: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("'{0}' file was not found in the archive")]
    MemberNotFound(String),

    #[error("malformed metadata: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("dist-tag not found: {0}")]
    TagNotFound(String),

    #[error("upstream response missing '{0}' header")]
    MissingHeader(&'static str),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error(transparent)]
    Storage(#[from] jute_adapter::StorageError),

    #[error("archive I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
