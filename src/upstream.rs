//! Best-effort client for the upstream registry.
//!
//! Every fetch collapses failure into an empty result: a status other than
//! 200, a timeout, or a transport error is logged and reported as absence,
//! never raised. Upstream outages degrade the proxy to its cache instead of
//! failing the serving path.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, LAST_MODIFIED};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

use crate::config::UpstreamConfig;
use crate::error::Error;
use crate::meta::now_iso;

const UA: &str = concat!("jute/", env!("CARGO_PKG_VERSION"));

/// A package metadata document as served by the upstream, body unparsed.
#[derive(Debug, Clone)]
pub struct RemotePackage {
    pub name: String,
    pub content: String,
    pub last_modified: String,
}

#[derive(Debug, Clone)]
pub struct AssetMeta {
    pub content_type: String,
    pub last_modified: String,
}

/// Remote repository client. The proxy orchestrator is generic over this so
/// tests can substitute a stub for the HTTP implementation.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Fetches a package metadata document. Empty on any failure.
    async fn load_package(&self, name: &str) -> Option<RemotePackage>;

    /// Streams an asset body into `sink` chunk by chunk, never buffering the
    /// whole body. Empty on any failure, including a missing `Content-Type`
    /// header (an upstream contract violation, logged).
    async fn load_asset(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Option<AssetMeta>;

    /// Releases the underlying connection pool. Idempotent.
    fn close(&self);
}

/// reqwest-backed [`Remote`]. Owns its connection pool; one instance per
/// proxy, constructed explicitly and released via `close`/drop.
pub struct HttpRemote {
    client: reqwest::Client,
    base: String,
}

impl HttpRemote {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(UA)
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle)
            .build()?;
        Ok(HttpRemote {
            client,
            base: config.url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn package_url(&self, name: &str) -> String {
        // Scoped names keep their @ but encode the separating slash.
        format!("{}/{}", self.base, name.replace('/', "%2f"))
    }

    fn asset_url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn load_package(&self, name: &str) -> Option<RemotePackage> {
        let response = match self.client.get(self.package_url(name)).send().await {
            Ok(response) => response,
            Err(err) => {
                error!(package = %name, error = %err, "get package call failed");
                return None;
            }
        };
        if response.status() != StatusCode::OK {
            debug!(package = %name, status = %response.status(), "could not load package");
            return None;
        }

        let last_modified = last_modified_or_now(response.headers());
        match response.text().await {
            Ok(content) => Some(RemotePackage {
                name: name.to_string(),
                content,
                last_modified,
            }),
            Err(err) => {
                error!(package = %name, error = %err, "reading package body failed");
                None
            }
        }
    }

    async fn load_asset(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Option<AssetMeta> {
        let response = match self.client.get(self.asset_url(path)).send().await {
            Ok(response) => response,
            Err(err) => {
                error!(asset = %path, error = %err, "get asset call failed");
                return None;
            }
        };
        if response.status() != StatusCode::OK {
            debug!(asset = %path, status = %response.status(), "could not load asset");
            return None;
        }

        let content_type = match response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        {
            Some(value) => value.to_string(),
            None => {
                let err = Error::MissingHeader("Content-Type");
                error!(asset = %path, error = %err, "upstream violated asset contract");
                return None;
            }
        };
        let last_modified = last_modified_or_now(response.headers());

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    error!(asset = %path, error = %err, "asset stream interrupted");
                    return None;
                }
            };
            if let Err(err) = sink.write_all(&chunk).await {
                error!(asset = %path, error = %err, "writing asset to sink failed");
                return None;
            }
        }
        if let Err(err) = sink.flush().await {
            error!(asset = %path, error = %err, "flushing asset sink failed");
            return None;
        }

        Some(AssetMeta {
            content_type,
            last_modified,
        })
    }

    fn close(&self) {
        // The pool is torn down when the last clone of the client drops.
        debug!("closing upstream client");
    }
}

fn last_modified_or_now(headers: &reqwest::header::HeaderMap) -> String {
    headers
        .get(LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(now_iso)
}
