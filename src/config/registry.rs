//! Registry connection settings
//!
//! ```toml
//! [registry]
//! address = "http://127.0.0.1:8500"
//! datacenter = "dc1"          # optional
//! token = "s3cr3t"            # default: "anonymous"
//! consistency = "stale"       # default | consistent | stale
//! ```

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::ANONYMOUS_TOKEN;
use crate::constants::DEFAULT_REGISTRY_ADDRESS;
use crate::Error;
use crate::Result;

/// Read consistency requested from the registry
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyMode {
    /// Leader-served reads with a small staleness window
    #[default]
    Default,
    /// Linearizable reads, at the cost of an extra round trip
    Consistent,
    /// Any server may answer; lowest latency
    Stale,
}

impl ConsistencyMode {
    /// Query parameter to append, if any
    pub fn query_flag(&self) -> Option<&'static str> {
        match self {
            ConsistencyMode::Default => None,
            ConsistencyMode::Consistent => Some("consistent"),
            ConsistencyMode::Stale => Some("stale"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Base URL of the registry HTTP API
    #[serde(default = "default_address")]
    pub address: String,

    /// Datacenter to query; the agent's own when unset
    #[serde(default)]
    pub datacenter: Option<String>,

    /// ACL token
    #[serde(default = "default_token")]
    pub token: String,

    #[serde(default)]
    pub consistency: ConsistencyMode,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("address", &self.address)
            .field("datacenter", &self.datacenter)
            .field("token", &"<redacted>")
            .field("consistency", &self.consistency)
            .finish()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            datacenter: None,
            token: default_token(),
            consistency: ConsistencyMode::default(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "registry.address must not be empty".into(),
            )));
        }
        if !(self.address.starts_with("http://") || self.address.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "registry.address must be an http(s) URL, got {}",
                self.address
            )));
        }
        Ok(())
    }

    /// Configured token, falling back to the anonymous token when blank
    pub fn effective_token(&self) -> &str {
        if self.token.trim().is_empty() {
            ANONYMOUS_TOKEN
        } else {
            &self.token
        }
    }
}

fn default_address() -> String {
    DEFAULT_REGISTRY_ADDRESS.to_string()
}
fn default_token() -> String {
    ANONYMOUS_TOKEN.to_string()
}
