use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Base URL clients use to reach this registry. Prefixed onto stored
    /// tarball paths when metadata is rewritten for a client.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8346".to_string()
}
