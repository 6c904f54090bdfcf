use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;

use crate::Error;
use crate::Result;


lazy_static! {
    pub static ref FETCH_OUTCOME_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("fetch_total", "Registry fetch cycles by resource kind and outcome"),
        &["kind", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref SNAPSHOTS_PUBLISHED_METRIC: IntCounter = IntCounter::new(
        "snapshots_published_total",
        "Aggregate snapshots published by the aggregator"
    )
    .expect("metric can not be created");

    pub static ref SNAPSHOTS_GATED_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("snapshots_gated_total", "Dependency gate decisions"),
        &["result"]
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCH_LOOPS_METRIC: IntGauge = IntGauge::new(
        "active_watch_loops",
        "Watch loops currently running"
    )
    .expect("metric can not be created");
}

/// Registers every collector with `registry`.
///
/// Registering twice with the same registry is an error.
pub fn register_metrics(registry: &Registry) -> Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(FETCH_OUTCOME_METRIC.clone()),
        Box::new(SNAPSHOTS_PUBLISHED_METRIC.clone()),
        Box::new(SNAPSHOTS_GATED_METRIC.clone()),
        Box::new(ACTIVE_WATCH_LOOPS_METRIC.clone()),
    ];
    for collector in collectors {
        registry
            .register(collector)
            .map_err(|e| Error::Fatal(format!("metric registration failed: {e}")))?;
    }
    Ok(())
}

/// Prometheus text exposition of everything in `registry`
pub fn render_metrics(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| Error::Fatal(format!("metric encoding failed: {e}")))?;
    String::from_utf8(buffer).map_err(|e| Error::Fatal(format!("metric encoding failed: {e}")))
}
