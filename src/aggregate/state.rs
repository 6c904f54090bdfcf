use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::Observation;
use crate::model::Payload;
use crate::model::Resource;
use crate::model::ServiceEntry;
use crate::model::StatusClass;
use crate::model::ValueNode;

/// Last accepted state of a single key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEntry {
    Present(Arc<ValueNode>),
    /// Observed and confirmed not to exist
    Absent,
}

/// Last accepted state of a key prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixEntry {
    Nodes(Arc<Vec<ValueNode>>),
    /// Observed with no keys underneath. Distinct from never observed.
    MissingOrEmpty,
}

/// Immutable view of every resource observed so far.
///
/// A new state is derived per accepted observation with [`AggregateState::apply`].
/// Entries sit behind `Arc`, so a successor shares every entry it did not
/// replace with its predecessor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateState {
    services: BTreeMap<String, Arc<Vec<ServiceEntry>>>,
    keys: BTreeMap<String, KeyEntry>,
    prefixes: BTreeMap<String, PrefixEntry>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successor state with `observation` applied.
    ///
    /// Returns `None` when the observation is rejected: a status other than
    /// found or not-found, or a payload that does not match the resource kind.
    pub fn apply(&self, observation: &Observation) -> Option<AggregateState> {
        let class = observation.status.class();
        if !matches!(class, StatusClass::Found | StatusClass::NotFound) || observation.is_malformed() {
            return None;
        }
        let not_found = class == StatusClass::NotFound;

        let mut next = self.clone();
        match (&observation.resource, &observation.payload) {
            (Resource::Service(name), Payload::Service(entries)) => {
                let entries = if not_found { Vec::new() } else { entries.clone() };
                next.services.insert(name.clone(), Arc::new(entries));
            }
            (Resource::Key(key), Payload::Key(node)) => {
                let entry = match node {
                    Some(node) if !not_found => KeyEntry::Present(Arc::new(node.clone())),
                    _ => KeyEntry::Absent,
                };
                next.keys.insert(key.clone(), entry);
            }
            (Resource::KeyPrefix(prefix), Payload::KeyPrefix(nodes)) => {
                let entry = match nodes {
                    Some(nodes) if !not_found && !nodes.is_empty() => PrefixEntry::Nodes(Arc::new(nodes.clone())),
                    _ => PrefixEntry::MissingOrEmpty,
                };
                next.prefixes.insert(prefix.clone(), entry);
            }
            _ => return None,
        }
        Some(next)
    }

    /// Instances of `name`. `None` until the service has been observed.
    pub fn service(&self, name: &str) -> Option<&[ServiceEntry]> {
        self.services.get(name).map(|entries| entries.as_slice())
    }

    pub fn key(&self, key: &str) -> Option<&KeyEntry> {
        self.keys.get(key)
    }

    /// Value node of `key` if it has been observed and exists
    pub fn key_value(&self, key: &str) -> Option<&ValueNode> {
        match self.keys.get(key)? {
            KeyEntry::Present(node) => Some(node),
            KeyEntry::Absent => None,
        }
    }

    pub fn prefix(&self, prefix: &str) -> Option<&PrefixEntry> {
        self.prefixes.get(prefix)
    }

    /// Whether any accepted observation has been recorded for `resource`
    pub fn has_entry(&self, resource: &Resource) -> bool {
        match resource {
            Resource::Service(name) => self.services.contains_key(name),
            Resource::Key(key) => self.keys.contains_key(key),
            Resource::KeyPrefix(prefix) => self.prefixes.contains_key(prefix),
        }
    }

    /// Number of recorded resources
    pub fn len(&self) -> usize {
        self.services.len() + self.keys.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn services(&self) -> impl Iterator<Item = (&str, &[ServiceEntry])> {
        self.services.iter().map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = (&str, &KeyEntry)> {
        self.keys.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn prefixes(&self) -> impl Iterator<Item = (&str, &PrefixEntry)> {
        self.prefixes.iter().map(|(prefix, entry)| (prefix.as_str(), entry))
    }

    #[cfg(test)]
    pub(crate) fn service_arc(&self, name: &str) -> Option<&Arc<Vec<ServiceEntry>>> {
        self.services.get(name)
    }
}
