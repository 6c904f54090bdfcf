//! Dependency gate
//!
//! Holds back aggregate snapshots until every required resource has been
//! observed at least once. A recorded absence or an empty-prefix tombstone
//! counts as observed; only a resource with no accepted observation yet keeps
//! a snapshot from passing. Each snapshot is judged on its own.


use std::collections::btree_set;
use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use tracing::trace;

use crate::aggregate::AggregateState;
use crate::metrics::SNAPSHOTS_GATED_METRIC;
use crate::model::Resource;
use crate::Result;

/// Resources that must each have an entry before a snapshot is usable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    resources: BTreeSet<Resource>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `resource`. Returns false if it was already required.
    pub fn require(&mut self, resource: Resource) -> bool {
        self.resources.insert(resource)
    }

    pub fn contains(&self, resource: &Resource) -> bool {
        self.resources.contains(resource)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, Resource> {
        self.resources.iter()
    }

    pub fn is_satisfied_by(&self, state: &AggregateState) -> bool {
        self.resources.iter().all(|r| state.has_entry(r))
    }

    /// Required resources `state` has no entry for
    pub fn missing<'a>(&'a self, state: &'a AggregateState) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources.iter().filter(move |r| !state.has_entry(r))
    }
}

impl FromIterator<Resource> for DependencySet {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        Self {
            resources: iter.into_iter().collect(),
        }
    }
}

impl Extend<Resource> for DependencySet {
    fn extend<I: IntoIterator<Item = Resource>>(&mut self, iter: I) {
        self.resources.extend(iter);
    }
}

impl IntoIterator for DependencySet {
    type Item = Resource;
    type IntoIter = btree_set::IntoIter<Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_iter()
    }
}

impl<'a> IntoIterator for &'a DependencySet {
    type Item = &'a Resource;
    type IntoIter = btree_set::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

/// Stream adapter forwarding only snapshots that satisfy a [`DependencySet`].
/// Errors are forwarded unchanged.
#[derive(Debug)]
pub struct DependencyGate<S> {
    inner: S,
    required: DependencySet,
}

impl<S> DependencyGate<S> {
    pub fn new(inner: S, required: DependencySet) -> Self {
        Self { inner, required }
    }

    pub fn required(&self) -> &DependencySet {
        &self.required
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> Stream for DependencyGate<S>
where
    S: Stream<Item = Result<Arc<AggregateState>>> + Unpin,
{
    type Item = Result<Arc<AggregateState>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(snapshot))) => {
                    if self.required.is_satisfied_by(&snapshot) {
                        SNAPSHOTS_GATED_METRIC.with_label_values(&["forwarded"]).inc();
                        return Poll::Ready(Some(Ok(snapshot)));
                    }
                    SNAPSHOTS_GATED_METRIC.with_label_values(&["held"]).inc();
                    trace!(
                        missing = ?self.required.missing(&snapshot).collect::<Vec<_>>(),
                        "snapshot held back"
                    );
                }
                other => return other,
            }
        }
    }
}
