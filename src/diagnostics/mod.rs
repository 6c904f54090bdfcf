//! Per-fetch diagnostic events.
//!
//! Every fetch cycle of every watch loop produces one [`FetchEvent`]. Events are
//! handed to a [`DiagnosticSink`]; what the sink does with them (log, ship to a
//! collector, keep for assertions) has no influence on the watch itself.


use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use crate::model::Cursor;
use crate::model::Resource;
use crate::model::StatusCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Status was found, not-found or other; an observation was emitted
    Emitted { status: StatusCode, next_cursor: Cursor },
    /// 5xx; nothing emitted, same cursor will be retried
    ServerError { status: StatusCode },
    /// Nothing usable came back; the loop is stopping
    TransportFailure { message: String },
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Emitted { status, .. } => status.class().as_str(),
            FetchOutcome::ServerError { .. } => "server_error",
            FetchOutcome::TransportFailure { .. } => "transport_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchEvent {
    pub resource: Resource,
    /// Cursor sent with the fetch
    pub cursor: Cursor,
    pub outcome: FetchOutcome,
    pub elapsed: Duration,
}

pub trait DiagnosticSink: Send + Sync + 'static {
    fn emit(&self, event: &FetchEvent);
}

/// Writes each event to the `tracing` pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: &FetchEvent) {
        match &event.outcome {
            FetchOutcome::Emitted { status, next_cursor } => debug!(
                resource = %event.resource,
                cursor = event.cursor,
                next_cursor,
                status = status.0,
                elapsed_ms = event.elapsed.as_millis() as u64,
                "fetch completed"
            ),
            FetchOutcome::ServerError { status } => warn!(
                resource = %event.resource,
                cursor = event.cursor,
                status = status.0,
                "registry server error, retrying with same cursor"
            ),
            FetchOutcome::TransportFailure { message } => warn!(
                resource = %event.resource,
                cursor = event.cursor,
                error = %message,
                "fetch failed"
            ),
        }
    }
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn emit(&self, _event: &FetchEvent) {}
}

/// Keeps events in memory, mostly for assertions
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<FetchEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FetchEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, resource: &Resource) -> Vec<FetchEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.resource == resource)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, event: &FetchEvent) {
        self.events.lock().push(event.clone());
    }
}
