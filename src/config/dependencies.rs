use serde::Deserialize;
use serde::Serialize;

use crate::gate::DependencySet;
use crate::model::Resource;

/// Declared dependencies, as read from configuration
///
/// ```toml
/// [dependencies]
/// services = ["web", "db"]
/// keys = ["config/flag"]
/// prefixes = ["app/"]
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyConfig {
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl DependencyConfig {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.keys.is_empty() && self.prefixes.is_empty()
    }

    pub fn to_dependency_set(&self) -> DependencySet {
        let services = self.services.iter().map(Resource::service);
        let keys = self.keys.iter().map(Resource::key);
        let prefixes = self.prefixes.iter().map(Resource::prefix);
        services.chain(keys).chain(prefixes).collect()
    }
}
