use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: Url,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_secs: default_timeout_secs(),
            pool_max_idle: default_pool_max_idle(),
        }
    }
}

fn default_upstream_url() -> Url {
    Url::parse("https://registry.npmjs.org").expect("static url")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_pool_max_idle() -> usize {
    8
}
