use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub mod logging;
pub mod registry;
pub mod storage;
pub mod upstream;


pub use logging::{LogFormat, LoggingConfig};
pub use registry::RegistryConfig;
pub use storage::StorageConfig;
pub use upstream::UpstreamConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub upstream: Option<UpstreamConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let candidate = path.unwrap_or_else(|| PathBuf::from("jute.toml"));
        if candidate.exists() {
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read config {}", candidate.display()))?;
            let mut config: Config = toml::from_str(&raw)
                .with_context(|| format!("invalid config {}", candidate.display()))?;
            config
                .storage
                .resolve_relative_to(candidate.parent().unwrap_or(Path::new(".")));
            Ok(config)
        } else {
            if let Some(path) = candidate.to_str() {
                tracing::warn!("configuration file {path} not found, using defaults");
            } else {
                tracing::warn!("configuration file not found, using defaults");
            }
            let mut config = Config::default();
            let cwd = std::env::current_dir().context("reading current directory")?;
            config.storage.resolve_relative_to(&cwd);
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(upstream) = self
            .upstream
            .as_ref()
            .filter(|upstream| upstream.url.scheme() != "https" && upstream.url.scheme() != "http")
        {
            bail!("unsupported upstream scheme {}", upstream.url);
        }
        if self.registry.base_url.ends_with('/') {
            bail!("registry base_url must not end with a slash");
        }
        Ok(())
    }
}
