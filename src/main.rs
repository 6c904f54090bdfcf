use std::sync::Arc;

use prometheus::Registry;
use regwatch::metrics::register_metrics;
use regwatch::metrics::render_metrics;
use regwatch::AggregateState;
use regwatch::DependencyWatcher;
use regwatch::Error;
use regwatch::HttpRegistryClient;
use regwatch::RegwatchConfig;
use regwatch::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio_stream::StreamExt;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();

    // Optional first argument: extra configuration file layered on top
    let mut settings = RegwatchConfig::new()?;
    if let Some(path) = std::env::args().nth(1) {
        settings = settings.with_override_config(&path)?;
    }
    let settings = settings.validate()?;
    debug!(?settings, "configuration loaded");

    let metrics = Registry::new_custom(Some("regwatch".to_string()), None)
        .map_err(|e| Error::Fatal(format!("metrics registry: {e}")))?;
    register_metrics(&metrics)?;

    if settings.dependencies.is_empty() {
        warn!("no dependencies configured, nothing to watch");
        return Ok(());
    }

    let client = Arc::new(HttpRegistryClient::new(settings.registry.clone(), &settings.watch)?);
    let watcher = DependencyWatcher::from_config(client, &settings);
    let mut snapshots = watcher.subscribe();

    info!(address = %settings.registry.address, "watching registry. Waiting for CTRL+C signal...");

    let shutdown = graceful_shutdown();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            biased;
            signalled = &mut shutdown => break signalled,
            item = snapshots.next() => match item {
                Some(Ok(snapshot)) => log_snapshot(&snapshot),
                Some(Err(e)) => {
                    error!(error = %e, "watch terminated");
                    break Err(e);
                }
                None => {
                    info!("watch stream ended");
                    break Ok(());
                }
            },
        }
    };
    drop(snapshots);

    match render_metrics(&metrics) {
        Ok(text) => debug!("final metrics:\n{text}"),
        Err(e) => warn!(error = %e, "could not render metrics"),
    }

    println!("Exiting program.");
    outcome
}

fn log_snapshot(snapshot: &AggregateState) {
    info!(resources = snapshot.len(), "dependencies satisfied, snapshot received");
    for (name, entries) in snapshot.services() {
        info!(service = name, instances = entries.len(), "service");
    }
    for (key, entry) in snapshot.keys() {
        info!(key, ?entry, "key");
    }
    for (prefix, entry) in snapshot.prefixes() {
        info!(prefix, ?entry, "prefix");
    }
}

async fn graceful_shutdown() -> Result<()> {
    let mut sigint =
        signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(format!("SIGINT handler: {e}")))?;
    let mut sigterm =
        signal(SignalKind::terminate()).map_err(|e| Error::Fatal(format!("SIGTERM handler: {e}")))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    info!("Shutdown completed");
    Ok(())
}

fn init_observability() {
    let base_subscriber = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();
}
