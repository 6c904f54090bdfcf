// -
// Registry HTTP protocol

/// Header carrying the blocking-query index
pub(crate) const INDEX_HEADER: &str = "X-Consul-Index";

/// Header carrying the ACL token
pub(crate) const TOKEN_HEADER: &str = "X-Consul-Token";

/// Token sent when none is configured
pub const ANONYMOUS_TOKEN: &str = "anonymous";

// -
// Defaults

pub(crate) const DEFAULT_REGISTRY_ADDRESS: &str = "http://127.0.0.1:8500";

/// Registry caps blocking queries at 10 minutes; stay below it
pub(crate) const DEFAULT_MAX_WAIT_MS: u64 = 5 * 60 * 1000;

pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

pub(crate) const DEFAULT_CHANNEL_BUFFER: usize = 64;

/// Environment variable prefix for config overrides
pub(crate) const ENV_PREFIX: &str = "REGWATCH";

/// Environment variable pointing at an extra config file
pub(crate) const ENV_CONFIG_PATH: &str = "REGWATCH_CONFIG";
