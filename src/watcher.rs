//! Top-level entry point tying the pipeline together:
//!
//! ```text
//! WatchLoop × N ──► merge ──► Aggregator ──► DependencyGate ──► consumer
//! ```

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use tracing::info;

use crate::aggregate::AggregateState;
use crate::aggregate::Aggregator;
use crate::aggregate::SnapshotStream;
use crate::config::RegwatchConfig;
use crate::config::WatchConfig;
use crate::diagnostics::DiagnosticSink;
use crate::diagnostics::TracingSink;
use crate::gate::DependencyGate;
use crate::gate::DependencySet;
use crate::model::Resource;
use crate::registry::RegistryClient;
use crate::watch::merge;
use crate::watch::WatchLoop;
use crate::Result;

/// Watches a set of registry resources and yields aggregate snapshots once
/// every required resource has been observed.
///
/// # Examples
/// ```ignore
/// let watcher = DependencyWatcher::new(client, WatchConfig::default())
///     .require(Resource::service("web"))
///     .require(Resource::key("config/flag"));
/// let mut snapshots = watcher.subscribe();
/// while let Some(snapshot) = snapshots.next().await {
///     let snapshot = snapshot?;
///     // every required resource has an entry here
/// }
/// ```
pub struct DependencyWatcher<C>
where
    C: RegistryClient,
{
    client: Arc<C>,
    config: WatchConfig,
    required: DependencySet,
    extra: BTreeSet<Resource>,
    sink: Arc<dyn DiagnosticSink>,
}

impl<C> std::fmt::Debug for DependencyWatcher<C>
where
    C: RegistryClient,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyWatcher")
            .field("config", &self.config)
            .field("required", &self.required)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

impl<C> DependencyWatcher<C>
where
    C: RegistryClient,
{
    /// Watcher with no dependencies that reports fetches through `tracing`
    pub fn new(client: Arc<C>, config: WatchConfig) -> Self {
        Self {
            client,
            config,
            required: DependencySet::new(),
            extra: BTreeSet::new(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Watcher for the dependencies declared in `settings`
    pub fn from_config(client: Arc<C>, settings: &RegwatchConfig) -> Self {
        Self::new(client, settings.watch).require_all(settings.dependencies.to_dependency_set())
    }

    pub fn require(mut self, resource: Resource) -> Self {
        self.required.require(resource);
        self
    }

    pub fn require_all(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.required.extend(resources);
        self
    }

    /// Watches `resource` without holding snapshots back for it
    pub fn watch(mut self, resource: Resource) -> Self {
        self.extra.insert(resource);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn required(&self) -> &DependencySet {
        &self.required
    }

    /// Every distinct resource a subscription will watch
    pub fn resources(&self) -> BTreeSet<Resource> {
        self.required.iter().chain(self.extra.iter()).cloned().collect()
    }

    /// Starts one watch loop per resource and returns the gated snapshots.
    ///
    /// Must be called within a tokio runtime. Each call is an independent
    /// subscription with its own loops and cursors.
    pub fn subscribe(&self) -> DependencyStream {
        let resources = self.resources();
        info!(
            resources = resources.len(),
            required = self.required.len(),
            "subscribing to registry resources"
        );

        let loops = resources
            .into_iter()
            .map(|resource| WatchLoop::new(resource, self.client.clone(), &self.config, self.sink.clone()))
            .collect();
        let merged = merge(loops, self.config.channel_buffer);
        let snapshots = Aggregator::new().spawn(merged, self.config.channel_buffer);

        DependencyStream {
            inner: DependencyGate::new(snapshots, self.required.clone()),
        }
    }
}

/// Gated snapshot stream of one subscription. Dropping it stops every loop.
#[derive(Debug)]
pub struct DependencyStream {
    inner: DependencyGate<SnapshotStream>,
}

impl DependencyStream {
    /// Most recent snapshot, whether or not it satisfies the dependencies
    pub fn latest(&self) -> Arc<AggregateState> {
        self.inner.get_ref().latest()
    }

    /// Whether the most recent snapshot satisfies the dependencies
    pub fn is_ready(&self) -> bool {
        self.inner.required().is_satisfied_by(&self.latest())
    }
}

impl Stream for DependencyStream {
    type Item = Result<Arc<AggregateState>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
