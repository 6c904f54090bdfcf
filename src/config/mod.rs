//! Configuration management for the registry watcher.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod dependencies;
mod registry;
mod watch;
pub use dependencies::*;
pub use registry::*;
pub use watch::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::ENV_CONFIG_PATH;
use crate::constants::ENV_PREFIX;
use crate::Result;

/// Main configuration container
///
/// Sources are merged with the following priority (later wins):
/// 1. Default values from code
/// 2. `config/regwatch.{toml}` in the working directory (optional)
/// 3. Configuration file named by `REGWATCH_CONFIG` (required when set)
/// 4. Environment variables with `REGWATCH__` prefix
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct RegwatchConfig {
    /// Registry endpoint and request options
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Long-poll and retry behaviour of the watch loops
    #[serde(default)]
    pub watch: WatchConfig,
    /// Resources that must all be observed before a snapshot is released
    #[serde(default)]
    pub dependencies: DependencyConfig,
}

impl Debug for RegwatchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegwatchConfig")
            .field("registry", &self.registry)
            .field("watch", &self.watch)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl RegwatchConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// # Note
    /// Validation is deferred so callers can layer `with_override_config()`
    /// on top. Call `validate()` before using the result.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("REGWATCH__REGISTRY__ADDRESS", "http://10.0.0.5:8500");
    /// let cfg = RegwatchConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::with_name("config/regwatch").required(false));

        if let Ok(config_path) = env::var(ENV_CONFIG_PATH) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        let config: Self = builder
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Applies additional overrides from a file without validation.
    ///
    /// Merging order (later wins): current values, the new file, environment.
    pub fn with_override_config(&self, path: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.registry.validate()?;
        self.watch.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("dependencies.services")
        .with_list_parse_key("dependencies.keys")
        .with_list_parse_key("dependencies.prefixes")
}
