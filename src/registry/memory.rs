//! In-process registry with real blocking-query semantics.
//!
//! Every write bumps a global index. Each resource reports the index of the
//! last write that touched it, so a watcher blocked on one key is not woken by
//! writes to an unrelated service. Faults can be queued per resource to
//! exercise the server-error and transport-failure paths.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

use super::FetchResponse;
use super::FetchResult;
use super::RegistryClient;
use crate::errors::TransportError;
use crate::model::Cursor;
use crate::model::Resource;
use crate::model::ServiceEntry;
use crate::model::StatusCode;
use crate::model::ValueNode;

/// Something to return instead of the real answer on the next fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer with this status (5xx or other) and an empty payload
    Status(StatusCode),
    /// Fail the fetch below the status layer
    Transport(String),
}

#[derive(Debug)]
struct RegistryData {
    index: u64,
    services: BTreeMap<String, (u64, Vec<ServiceEntry>)>,
    kv: BTreeMap<String, ValueNode>,
    /// Index at which a key was last deleted
    deleted: BTreeMap<String, u64>,
    faults: HashMap<Resource, VecDeque<Fault>>,
    fetches: Vec<(Resource, Cursor)>,
}

impl Default for RegistryData {
    /// Index 1 is what never-written resources report, so the first real
    /// write lands on 2 and wakes queries blocked on it
    fn default() -> Self {
        Self {
            index: 1,
            services: BTreeMap::new(),
            kv: BTreeMap::new(),
            deleted: BTreeMap::new(),
            faults: HashMap::new(),
            fetches: Vec::new(),
        }
    }
}

impl RegistryData {
    fn bump(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Resources that never existed report 1 so a follow-up query blocks
    /// instead of spinning on cursor 0
    fn resource_index(&self, resource: &Resource) -> u64 {
        let index = match resource {
            Resource::Service(name) => self.services.get(name).map(|(i, _)| *i).unwrap_or(0),
            Resource::Key(key) => self
                .kv
                .get(key)
                .map(|n| n.modify_index)
                .or_else(|| self.deleted.get(key).copied())
                .unwrap_or(0),
            Resource::KeyPrefix(prefix) => {
                let live = self
                    .kv
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(prefix.as_str()))
                    .map(|(_, n)| n.modify_index)
                    .max()
                    .unwrap_or(0);
                let gone = self
                    .deleted
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(prefix.as_str()))
                    .map(|(_, i)| *i)
                    .max()
                    .unwrap_or(0);
                live.max(gone)
            }
        };
        index.max(1)
    }

    fn take_fault(&mut self, resource: &Resource) -> Option<Fault> {
        self.faults.get_mut(resource).and_then(|queue| queue.pop_front())
    }
}

#[derive(Debug)]
pub struct MemoryRegistry {
    data: Mutex<RegistryData>,
    changed: watch::Sender<u64>,
    max_wait: Duration,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl MemoryRegistry {
    pub fn new(max_wait: Duration) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            data: Mutex::new(RegistryData::default()),
            changed,
            max_wait,
        }
    }

    /// Current global index
    pub fn index(&self) -> u64 {
        self.data.lock().index
    }

    /// Replaces every instance of `name`. An empty list keeps the service
    /// registered with no instances.
    pub fn set_service(&self, name: &str, entries: Vec<ServiceEntry>) -> u64 {
        let index = {
            let mut data = self.data.lock();
            let index = data.bump();
            let entries = entries
                .into_iter()
                .map(|mut e| {
                    e.modify_index = index;
                    e
                })
                .collect();
            data.services.insert(name.to_string(), (index, entries));
            index
        };
        self.notify(index);
        index
    }

    pub fn put_key(&self, key: &str, value: impl Into<Bytes>) -> u64 {
        let index = {
            let mut data = self.data.lock();
            let index = data.bump();
            let create_index = data.kv.get(key).map(|n| n.create_index).unwrap_or(index);
            data.deleted.remove(key);
            data.kv.insert(
                key.to_string(),
                ValueNode {
                    key: key.to_string(),
                    value: value.into(),
                    flags: 0,
                    create_index,
                    modify_index: index,
                    session: None,
                },
            );
            index
        };
        self.notify(index);
        index
    }

    pub fn delete_key(&self, key: &str) -> u64 {
        let index = {
            let mut data = self.data.lock();
            let index = data.bump();
            data.kv.remove(key);
            data.deleted.insert(key.to_string(), index);
            index
        };
        self.notify(index);
        index
    }

    /// Queues `fault` for the next fetch of `resource` and wakes any blocked
    /// query on it.
    pub fn inject_fault(&self, resource: Resource, fault: Fault) {
        let index = {
            let mut data = self.data.lock();
            data.faults.entry(resource).or_default().push_back(fault);
            data.index
        };
        self.notify(index);
    }

    /// Every fetch received so far, with the cursor it carried
    pub fn fetches(&self) -> Vec<(Resource, Cursor)> {
        self.data.lock().fetches.clone()
    }

    pub fn fetches_for(&self, resource: &Resource) -> Vec<Cursor> {
        self.data
            .lock()
            .fetches
            .iter()
            .filter(|(r, _)| r == resource)
            .map(|(_, c)| *c)
            .collect()
    }

    fn notify(&self, index: u64) {
        self.changed.send_replace(index);
    }

    /// Blocks until `resource` moves past `cursor`, a fault is queued, or the
    /// wait expires, then answers through `read`.
    async fn blocking_query<T>(
        &self,
        resource: Resource,
        cursor: Cursor,
        read: impl Fn(&RegistryData) -> (T, StatusCode),
        empty: impl Fn() -> T,
    ) -> FetchResult<T> {
        let deadline = Instant::now() + self.max_wait;
        let mut changed = self.changed.subscribe();
        self.data.lock().fetches.push((resource.clone(), cursor));

        loop {
            {
                let mut data = self.data.lock();
                if let Some(fault) = data.take_fault(&resource) {
                    trace!(%resource, ?fault, "returning injected fault");
                    return match fault {
                        Fault::Status(status) => Ok(FetchResponse::new(empty(), cursor, status)),
                        Fault::Transport(message) => Err(TransportError::Unreachable(message)),
                    };
                }

                let index = data.resource_index(&resource);
                if cursor == 0 || index > cursor {
                    let (payload, status) = read(&data);
                    return Ok(FetchResponse::new(payload, index, status));
                }
            }

            // Timed out: report the unchanged state, like the real registry
            if tokio::time::timeout_at(deadline, changed.changed()).await.is_err() {
                let data = self.data.lock();
                let (payload, status) = read(&data);
                return Ok(FetchResponse::new(payload, data.resource_index(&resource), status));
            }
        }
    }
}

#[async_trait::async_trait]
impl RegistryClient for MemoryRegistry {
    async fn fetch_service(&self, name: &str, cursor: Cursor) -> FetchResult<Vec<ServiceEntry>> {
        self.blocking_query(
            Resource::service(name),
            cursor,
            |data| match data.services.get(name) {
                Some((_, entries)) => (entries.clone(), StatusCode::OK),
                None => (Vec::new(), StatusCode::OK),
            },
            Vec::new,
        )
        .await
    }

    async fn fetch_key(&self, key: &str, cursor: Cursor) -> FetchResult<Option<ValueNode>> {
        self.blocking_query(
            Resource::key(key),
            cursor,
            |data| match data.kv.get(key) {
                Some(node) => (Some(node.clone()), StatusCode::OK),
                None => (None, StatusCode::NOT_FOUND),
            },
            || None,
        )
        .await
    }

    async fn fetch_key_prefix(&self, prefix: &str, cursor: Cursor) -> FetchResult<Vec<ValueNode>> {
        self.blocking_query(
            Resource::prefix(prefix),
            cursor,
            |data| {
                let nodes: Vec<ValueNode> = data
                    .kv
                    .range(prefix.to_string()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(_, n)| n.clone())
                    .collect();
                if nodes.is_empty() {
                    (nodes, StatusCode::NOT_FOUND)
                } else {
                    (nodes, StatusCode::OK)
                }
            },
            Vec::new,
        )
        .await
    }
}
