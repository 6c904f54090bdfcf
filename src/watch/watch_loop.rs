//! Per-resource long-poll loop.
//!
//! One loop owns one resource and one cursor. It issues a single blocking
//! fetch at a time and, depending on the outcome:
//!
//! | outcome                     | cursor          | emits | then                 |
//! |-----------------------------|-----------------|-------|----------------------|
//! | found / not-found / other   | advanced        | yes   | fetch again          |
//! | server error (5xx)          | unchanged       | no    | retry delay, refetch |
//! | transport failure           | unchanged       | error | loop stops           |

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::config::WatchConfig;
use crate::diagnostics::DiagnosticSink;
use crate::diagnostics::FetchEvent;
use crate::diagnostics::FetchOutcome;
use crate::metrics::ACTIVE_WATCH_LOOPS_METRIC;
use crate::metrics::FETCH_OUTCOME_METRIC;
use crate::model::Cursor;
use crate::model::Observation;
use crate::model::Payload;
use crate::model::Resource;
use crate::model::FRESH_CURSOR;
use crate::registry::FetchResponse;
use crate::registry::FetchResult;
use crate::registry::RegistryClient;
use crate::Error;
use crate::Result;

/// What a single fetch cycle decided
#[derive(Debug)]
pub(crate) enum Cycle {
    Emit(Observation),
    Retry,
}

pub struct WatchLoop<C>
where
    C: RegistryClient,
{
    resource: Resource,
    client: Arc<C>,
    retry_delay: Option<Duration>,
    sink: Arc<dyn DiagnosticSink>,
}

impl<C> std::fmt::Debug for WatchLoop<C>
where
    C: RegistryClient,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchLoop")
            .field("resource", &self.resource)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl<C> WatchLoop<C>
where
    C: RegistryClient,
{
    pub fn new(resource: Resource, client: Arc<C>, config: &WatchConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            resource,
            client,
            retry_delay: config.retry_delay(),
            sink,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    async fn fetch(&self, cursor: Cursor) -> FetchResult<Payload> {
        match &self.resource {
            Resource::Service(name) => self
                .client
                .fetch_service(name, cursor)
                .await
                .map(|r| FetchResponse::new(Payload::Service(r.payload), r.cursor, r.status)),
            Resource::Key(key) => self
                .client
                .fetch_key(key, cursor)
                .await
                .map(|r| FetchResponse::new(Payload::Key(r.payload), r.cursor, r.status)),
            Resource::KeyPrefix(prefix) => self
                .client
                .fetch_key_prefix(prefix, cursor)
                .await
                .map(|r| FetchResponse::new(Payload::KeyPrefix(Some(r.payload)), r.cursor, r.status)),
        }
    }

    /// Runs one fetch and classifies it. Emits the diagnostic event for the
    /// cycle regardless of outcome.
    pub(crate) async fn poll_once(&self, cursor: Cursor) -> Result<Cycle> {
        let started = Instant::now();
        let result = self.fetch(cursor).await;
        let elapsed = started.elapsed();

        let (cycle, outcome) = match result {
            Ok(response) if response.status.is_server_error() => {
                (Ok(Cycle::Retry), FetchOutcome::ServerError { status: response.status })
            }
            Ok(response) => {
                let outcome = FetchOutcome::Emitted {
                    status: response.status,
                    next_cursor: response.cursor,
                };
                let observation = Observation {
                    resource: self.resource.clone(),
                    status: response.status,
                    payload: response.payload,
                    cursor: response.cursor,
                };
                (Ok(Cycle::Emit(observation)), outcome)
            }
            Err(source) => {
                let outcome = FetchOutcome::TransportFailure {
                    message: source.to_string(),
                };
                let error = Error::Transport {
                    resource: self.resource.clone(),
                    cursor,
                    source,
                };
                (Err(error), outcome)
            }
        };

        FETCH_OUTCOME_METRIC
            .with_label_values(&[self.resource.kind().as_str(), outcome.label()])
            .inc();
        self.sink.emit(&FetchEvent {
            resource: self.resource.clone(),
            cursor,
            outcome,
            elapsed,
        });

        cycle
    }

    /// Drives the loop until cancelled, the receiver goes away, or a transport
    /// failure occurs. A transport failure is sent down `tx` before returning.
    pub async fn run(self, tx: mpsc::Sender<Result<Observation>>, token: CancellationToken) {
        ACTIVE_WATCH_LOOPS_METRIC.inc();
        debug!(resource = %self.resource, "watch loop started");

        let mut cursor = FRESH_CURSOR;
        loop {
            let cycle = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                cycle = self.poll_once(cursor) => cycle,
            };

            match cycle {
                Ok(Cycle::Emit(observation)) => {
                    let next = next_cursor(cursor, observation.cursor);
                    if next == FRESH_CURSOR && cursor != FRESH_CURSOR {
                        info!(
                            resource = %self.resource,
                            previous = cursor,
                            returned = observation.cursor,
                            "registry index went backwards, resetting cursor"
                        );
                    }
                    trace!(resource = %self.resource, cursor, next, "emitting observation");
                    cursor = next;

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        sent = tx.send(Ok(observation)) => {
                            if sent.is_err() {
                                debug!(resource = %self.resource, "observation receiver dropped");
                                break;
                            }
                        }
                    }
                }
                Ok(Cycle::Retry) => {
                    if let Some(delay) = self.retry_delay {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        // Immediate retry must still let other tasks run
                        tokio::task::yield_now().await;
                    }
                }
                Err(e) => {
                    warn!(resource = %self.resource, cursor, error = %e, "watch loop stopping");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {}
                        _ = tx.send(Err(e)) => {}
                    }
                    break;
                }
            }
        }

        ACTIVE_WATCH_LOOPS_METRIC.dec();
        debug!(resource = %self.resource, "watch loop stopped");
    }

    /// Runs the loop on its own task. A panic inside the loop is reported down
    /// `tx` as [`Error::ChannelClosed`] so the resource never drops out silently.
    pub fn spawn(self, tx: mpsc::Sender<Result<Observation>>, token: CancellationToken) -> JoinHandle<()> {
        let resource = self.resource.clone();
        let fallback = tx.clone();
        let cancelled = token.clone();

        tokio::spawn(async move {
            if AssertUnwindSafe(self.run(tx, token)).catch_unwind().await.is_err() {
                ACTIVE_WATCH_LOOPS_METRIC.dec();
                error!(%resource, "watch loop panicked");
                let e = Error::ChannelClosed(format!("watch loop for {resource} panicked"));
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => {}
                    _ = fallback.send(Err(e)) => {}
                }
            }
        })
    }

    /// Watches this single resource on its own channel. Cancel `token` to stop
    /// it; a dropped stream is only noticed at the next delivery.
    pub fn into_stream(self, buffer: usize, token: CancellationToken) -> ReceiverStream<Result<Observation>> {
        let (tx, rx) = mpsc::channel(buffer);
        self.spawn(tx, token);
        ReceiverStream::new(rx)
    }
}

/// Cursor for the next fetch. A registry index that moved backwards means the
/// registry's state was reset; start over with a fresh read.
pub(crate) fn next_cursor(current: Cursor, returned: Cursor) -> Cursor {
    if returned < current {
        FRESH_CURSOR
    } else {
        returned
    }
}
