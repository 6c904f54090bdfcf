//! Long-poll watcher for service-registry resources.
//!
//! Watches services, keys and key prefixes of a Consul-style registry,
//! folds every change into an immutable [`AggregateState`] and releases
//! snapshots once all declared dependencies have been observed.
pub mod aggregate;
pub mod config;
pub mod constants;
pub mod diagnostics;
mod errors;
pub mod gate;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod watch;
mod watcher;

pub use aggregate::AggregateState;
pub use aggregate::Aggregator;
pub use aggregate::KeyEntry;
pub use aggregate::PrefixEntry;
pub use aggregate::SnapshotStream;
pub use config::RegwatchConfig;
pub use errors::*;
pub use gate::DependencyGate;
pub use gate::DependencySet;
pub use model::*;
pub use registry::HttpRegistryClient;
pub use registry::MemoryRegistry;
pub use registry::RegistryClient;
pub use watcher::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
