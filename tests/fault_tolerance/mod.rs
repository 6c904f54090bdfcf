use std::sync::Arc;
use std::time::Duration;

use regwatch::diagnostics::FetchOutcome;
use regwatch::diagnostics::RecordingSink;
use regwatch::registry::Fault;
use regwatch::Error;
use regwatch::MemoryRegistry;
use regwatch::Resource;
use regwatch::StatusCode;
use regwatch::TransportError;
use tokio_stream::StreamExt;

use crate::commons::enable_logger;
use crate::commons::instance;
use crate::commons::next_within;
use crate::commons::watch_config;
use crate::commons::watcher;

#[tokio::test(start_paused = true)]
async fn server_error_backs_off_and_reuses_cursor() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::new(Duration::from_secs(3600)));
    let cursor = registry.put_key("config/flag", "true");
    let sink = RecordingSink::new();

    let mut stream = watcher(&registry, watch_config(1000))
        .require(Resource::key("config/flag"))
        .with_sink(Arc::new(sink.clone()))
        .subscribe();
    stream.next().await.unwrap().unwrap();

    registry.inject_fault(Resource::key("config/flag"), Fault::Status(StatusCode(503)));

    // Still inside the retry delay: only the failed fetch has happened
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(registry.fetches_for(&Resource::key("config/flag")), vec![0, cursor]);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(
        registry.fetches_for(&Resource::key("config/flag")),
        vec![0, cursor, cursor]
    );

    registry.put_key("config/flag", "false");
    let snapshot = stream.next().await.unwrap().unwrap();
    assert_eq!(snapshot.key_value("config/flag").unwrap().value_str(), Some("false"));

    let server_errors: Vec<_> = sink
        .events_for(&Resource::key("config/flag"))
        .into_iter()
        .filter(|e| matches!(e.outcome, FetchOutcome::ServerError { .. }))
        .collect();
    assert_eq!(server_errors.len(), 1);
    assert_eq!(server_errors[0].cursor, cursor);
}

#[tokio::test]
async fn other_status_does_not_publish_a_snapshot() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::default());
    registry.put_key("config/flag", "true");

    let mut stream = watcher(&registry, watch_config(0))
        .require(Resource::key("config/flag"))
        .subscribe();
    stream.next().await.unwrap().unwrap();

    registry.inject_fault(Resource::key("config/flag"), Fault::Status(StatusCode(403)));
    assert!(next_within(&mut stream, Duration::from_millis(50)).await.is_none());
    assert_eq!(
        stream.latest().key_value("config/flag").unwrap().value_str(),
        Some("true")
    );

    registry.put_key("config/flag", "false");
    let snapshot = stream.next().await.unwrap().unwrap();
    assert_eq!(snapshot.key_value("config/flag").unwrap().value_str(), Some("false"));
}

#[tokio::test]
async fn transport_failure_terminates_the_whole_stream() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::default());
    registry.set_service("web", vec![instance("web", "web-1", 8080)]);
    registry.put_key("config/flag", "true");

    let mut stream = watcher(&registry, watch_config(0))
        .require(Resource::service("web"))
        .require(Resource::key("config/flag"))
        .subscribe();
    let first = stream.next().await.unwrap().unwrap();
    assert!(first.has_entry(&Resource::service("web")));
    assert!(first.has_entry(&Resource::key("config/flag")));

    let cursor = registry.index();
    registry.inject_fault(
        Resource::key("config/flag"),
        Fault::Transport("connection reset by peer".into()),
    );

    let error = loop {
        match stream.next().await {
            Some(Ok(_)) => continue,
            Some(Err(e)) => break e,
            None => panic!("stream ended without surfacing the failure"),
        }
    };
    match error {
        Error::Transport {
            resource,
            cursor: failed_at,
            source: TransportError::Unreachable(_),
        } => {
            assert_eq!(resource, Resource::key("config/flag"));
            assert_eq!(failed_at, cursor);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(stream.next().await.is_none());

    // The healthy service loop was cancelled too
    tokio::time::sleep(Duration::from_millis(20)).await;
    let before = registry.fetches_for(&Resource::service("web")).len();
    registry.set_service("web", vec![instance("web", "web-2", 8081)]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.fetches_for(&Resource::service("web")).len(), before);
}
