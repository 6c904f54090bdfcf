use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use arc_swap::ArcSwap;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::AggregateState;
use crate::metrics::SNAPSHOTS_PUBLISHED_METRIC;
use crate::model::Observation;
use crate::Result;

/// Sole owner of the evolving aggregate.
///
/// Observations are applied one at a time; each accepted one publishes a new
/// snapshot. [`Aggregator::spawn`] moves the aggregator onto its own task so
/// observations from many loops are serialized through one channel.
#[derive(Debug)]
pub struct Aggregator {
    current: Arc<AggregateState>,
    latest: Arc<ArcSwap<AggregateState>>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        let current = Arc::new(AggregateState::new());
        Self {
            latest: Arc::new(ArcSwap::new(current.clone())),
            current,
        }
    }

    /// Applies one observation. Returns the published snapshot, or `None` if
    /// the observation was rejected and nothing changed.
    pub fn apply(&mut self, observation: &Observation) -> Option<Arc<AggregateState>> {
        let Some(next) = self.current.apply(observation) else {
            trace!(
                resource = %observation.resource,
                status = observation.status.0,
                "observation rejected"
            );
            return None;
        };

        let snapshot = Arc::new(next);
        self.current = snapshot.clone();
        self.latest.store(snapshot.clone());
        SNAPSHOTS_PUBLISHED_METRIC.inc();
        trace!(resource = %observation.resource, cursor = observation.cursor, "snapshot published");
        Some(snapshot)
    }

    pub fn current(&self) -> Arc<AggregateState> {
        self.current.clone()
    }

    /// Consumes `input` on a dedicated task and returns the snapshot stream.
    ///
    /// The task ends when `input` ends, after forwarding the first error from
    /// `input`, or when the returned stream is dropped. `input` is dropped with
    /// the task.
    pub fn spawn<S>(self, input: S, buffer: usize) -> SnapshotStream
    where
        S: Stream<Item = Result<Observation>> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let latest = self.latest.clone();
        let handle = tokio::spawn(self.run(input, tx));

        SnapshotStream {
            inner: ReceiverStream::new(rx),
            latest,
            handle,
        }
    }

    async fn run<S>(mut self, mut input: S, tx: mpsc::Sender<Result<Arc<AggregateState>>>)
    where
        S: Stream<Item = Result<Observation>> + Send + Unpin + 'static,
    {
        debug!("aggregator started");
        loop {
            let item = tokio::select! {
                biased;
                _ = tx.closed() => {
                    debug!("snapshot consumer went away");
                    break;
                }
                item = input.next() => item,
            };

            match item {
                Some(Ok(observation)) => {
                    if let Some(snapshot) = self.apply(&observation) {
                        if tx.send(Ok(snapshot)).await.is_err() {
                            debug!("snapshot consumer went away");
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "aggregator stopping on fatal error");
                    let _ = tx.send(Err(e)).await;
                    break;
                }
                None => break,
            }
        }
        debug!("aggregator stopped");
    }
}

/// Snapshots published by a spawned [`Aggregator`], in application order.
///
/// Dropping the stream stops the aggregator task and, with it, its input.
#[derive(Debug)]
pub struct SnapshotStream {
    inner: ReceiverStream<Result<Arc<AggregateState>>>,
    latest: Arc<ArcSwap<AggregateState>>,
    handle: JoinHandle<()>,
}

impl SnapshotStream {
    /// Most recently published snapshot. May be ahead of what this stream has
    /// yielded so far.
    pub fn latest(&self) -> Arc<AggregateState> {
        self.latest.load_full()
    }
}

impl Stream for SnapshotStream {
    type Item = Result<Arc<AggregateState>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
