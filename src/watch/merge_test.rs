use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;

use super::merge;
use super::WatchLoop;
use crate::config::WatchConfig;
use crate::diagnostics::NoopSink;
use crate::model::Resource;
use crate::registry::Fault;
use crate::registry::MemoryRegistry;
use crate::registry::MockRegistryClient;
use crate::test_utils::service_entry;
use crate::Error;

fn watch(registry: &Arc<MemoryRegistry>, resource: Resource) -> WatchLoop<MemoryRegistry> {
    WatchLoop::new(resource, registry.clone(), &WatchConfig::default(), Arc::new(NoopSink))
}

fn seeded_registry() -> Arc<MemoryRegistry> {
    let registry = Arc::new(MemoryRegistry::default());
    registry.set_service("web", vec![service_entry("web", "web-1")]);
    registry.put_key("config/flag", "true");
    registry
}

#[tokio::test]
async fn observations_from_every_loop_are_merged() {
    let registry = seeded_registry();
    let mut merged = merge(
        vec![
            watch(&registry, Resource::service("web")),
            watch(&registry, Resource::key("config/flag")),
        ],
        8,
    );
    assert_eq!(merged.loop_count(), 2);

    let mut seen = BTreeSet::new();
    for _ in 0..2 {
        let observation = merged.next().await.unwrap().unwrap();
        seen.insert(observation.resource);
    }
    assert!(seen.contains(&Resource::service("web")));
    assert!(seen.contains(&Resource::key("config/flag")));

    let index = registry.put_key("config/flag", "false");
    let observation = merged.next().await.unwrap().unwrap();
    assert_eq!(observation.resource, Resource::key("config/flag"));
    assert_eq!(observation.cursor, index);
}

#[tokio::test]
async fn slow_resource_does_not_hold_back_others() {
    let registry = seeded_registry();
    let mut merged = merge(
        vec![
            watch(&registry, Resource::service("web")),
            watch(&registry, Resource::key("config/flag")),
        ],
        8,
    );
    merged.next().await.unwrap().unwrap();
    merged.next().await.unwrap().unwrap();

    // The service loop is blocked on its long poll; key updates still flow
    for value in ["a", "b", "c"] {
        registry.put_key("config/flag", value);
        let observation = merged.next().await.unwrap().unwrap();
        assert_eq!(observation.resource, Resource::key("config/flag"));
    }
}

#[tokio::test]
async fn first_error_cancels_every_loop_and_ends_stream() {
    let registry = seeded_registry();
    registry.inject_fault(Resource::key("config/flag"), Fault::Transport("connection reset".into()));

    let mut merged = merge(
        vec![
            watch(&registry, Resource::service("web")),
            watch(&registry, Resource::key("config/flag")),
        ],
        8,
    );

    let items: Vec<_> = tokio::time::timeout(Duration::from_secs(5), (&mut merged).collect::<Vec<_>>())
        .await
        .expect("merged stream should end after a fatal error");

    let errors: Vec<_> = items.iter().filter(|i| i.is_err()).collect();
    assert_eq!(errors.len(), 1);
    match items.last() {
        Some(Err(e @ Error::Transport { .. })) => {
            assert_eq!(e.resource(), Some(&Resource::key("config/flag")));
        }
        other => panic!("expected trailing transport error, got {other:?}"),
    }
    assert!(merged.is_cancelled());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let before = registry.fetches_for(&Resource::service("web")).len();
    registry.set_service("web", vec![]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.fetches_for(&Resource::service("web")).len(), before);
}

#[tokio::test]
async fn dropping_the_stream_stops_every_loop() {
    let registry = seeded_registry();
    let mut merged = merge(
        vec![
            watch(&registry, Resource::service("web")),
            watch(&registry, Resource::key("config/flag")),
        ],
        8,
    );
    merged.next().await.unwrap().unwrap();
    merged.next().await.unwrap().unwrap();
    drop(merged);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let before = registry.fetches().len();
    registry.put_key("config/flag", "false");
    registry.set_service("web", vec![]);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(registry.fetches().len(), before);
}

#[tokio::test]
async fn cancel_ends_the_stream() {
    let registry = seeded_registry();
    let mut merged = merge(vec![watch(&registry, Resource::service("web"))], 8);
    merged.next().await.unwrap().unwrap();

    merged.cancel();

    assert!(merged.is_cancelled());
    assert!(merged.next().await.is_none());
}

#[tokio::test]
async fn no_loops_ends_immediately() {
    let mut merged = merge::<MemoryRegistry>(Vec::new(), 8);

    assert_eq!(merged.loop_count(), 0);
    assert!(merged.next().await.is_none());
}

#[tokio::test]
async fn panicked_loop_ends_the_merged_stream() {
    let mut client = MockRegistryClient::new();
    client
        .expect_fetch_service()
        .returning(|_, _| panic!("registry client bug"));

    let broken = WatchLoop::new(
        Resource::service("web"),
        Arc::new(client),
        &WatchConfig::default(),
        Arc::new(NoopSink),
    );
    let mut merged = merge(vec![broken], 8);

    let items: Vec<_> = tokio::time::timeout(Duration::from_secs(5), (&mut merged).collect::<Vec<_>>())
        .await
        .expect("merged stream should end after a panicked loop");

    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(Error::ChannelClosed(_))));
    assert!(merged.is_cancelled());
}
