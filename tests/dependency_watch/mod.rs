use std::sync::Arc;
use std::time::Duration;

use regwatch::config::DependencyConfig;
use regwatch::config::WatchConfig;
use regwatch::registry::Fault;
use regwatch::DependencySet;
use regwatch::DependencyWatcher;
use regwatch::KeyEntry;
use regwatch::MemoryRegistry;
use regwatch::PrefixEntry;
use regwatch::RegwatchConfig;
use regwatch::Resource;
use regwatch::StatusCode;
use tokio_stream::StreamExt;

use crate::commons::enable_logger;
use crate::commons::instance;
use crate::commons::next_within;
use crate::commons::wait_for_latest;
use crate::commons::watch_config;
use crate::commons::watcher;

#[tokio::test(start_paused = true)]
async fn snapshots_are_held_until_every_dependency_is_observed() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::default());
    registry.set_service("web", vec![instance("web", "web-1", 8080)]);
    // First fetch of the flag fails, so it stays unobserved until the retry
    registry.inject_fault(Resource::key("config/flag"), Fault::Status(StatusCode(503)));

    let mut stream = watcher(&registry, watch_config(1000))
        .require(Resource::service("web"))
        .require(Resource::key("config/flag"))
        .subscribe();

    wait_for_latest(&stream, |s| s.has_entry(&Resource::service("web"))).await;
    assert!(!stream.is_ready());
    assert!(next_within(&mut stream, Duration::from_millis(50)).await.is_none());

    registry.put_key("config/flag", "true");

    let snapshot = stream.next().await.unwrap().unwrap();
    assert_eq!(snapshot.service("web").unwrap().len(), 1);
    assert_eq!(snapshot.key_value("config/flag").unwrap().value_str(), Some("true"));
    assert!(stream.is_ready());
}

#[tokio::test]
async fn absent_key_satisfies_its_dependency() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::default());

    let mut stream = watcher(&registry, WatchConfig::default())
        .require(Resource::key("config/missing"))
        .subscribe();

    let snapshot = stream.next().await.unwrap().unwrap();
    assert_eq!(snapshot.key("config/missing"), Some(&KeyEntry::Absent));
}

#[tokio::test]
async fn key_changes_and_deletion_flow_through() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::default());
    registry.put_key("config/flag", "true");

    let mut stream = watcher(&registry, WatchConfig::default())
        .require(Resource::key("config/flag"))
        .subscribe();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.key_value("config/flag").unwrap().value_str(), Some("true"));

    registry.put_key("config/flag", "false");
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.key_value("config/flag").unwrap().value_str(), Some("false"));

    registry.delete_key("config/flag");
    let third = stream.next().await.unwrap().unwrap();
    assert_eq!(third.key("config/flag"), Some(&KeyEntry::Absent));

    // Earlier snapshots are untouched
    assert_eq!(first.key_value("config/flag").unwrap().value_str(), Some("true"));
}

#[tokio::test]
async fn prefix_moves_between_tombstone_and_nodes() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::default());

    let mut stream = watcher(&registry, WatchConfig::default())
        .require(Resource::prefix("app/"))
        .subscribe();

    let empty = stream.next().await.unwrap().unwrap();
    assert_eq!(empty.prefix("app/"), Some(&PrefixEntry::MissingOrEmpty));

    registry.put_key("app/a", "1");
    let populated = stream.next().await.unwrap().unwrap();
    match populated.prefix("app/") {
        Some(PrefixEntry::Nodes(nodes)) => assert_eq!(nodes[0].key, "app/a"),
        other => panic!("expected nodes, got {other:?}"),
    }

    registry.delete_key("app/a");
    let emptied = stream.next().await.unwrap().unwrap();
    assert_eq!(emptied.prefix("app/"), Some(&PrefixEntry::MissingOrEmpty));
}

#[tokio::test]
async fn extra_resources_are_watched_but_do_not_gate() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::default());
    registry.set_service("web", vec![instance("web", "web-1", 8080)]);

    let watcher = watcher(&registry, WatchConfig::default())
        .require(Resource::service("web"))
        .watch(Resource::service("db"));
    assert_eq!(watcher.resources().len(), 2);
    assert_eq!(watcher.required().len(), 1);

    let mut stream = watcher.subscribe();
    stream.next().await.unwrap().unwrap();
    wait_for_latest(&stream, |s| s.has_entry(&Resource::service("db"))).await;

    registry.set_service("db", vec![instance("db", "db-1", 5432)]);
    let mut latest = None;
    while let Some(snapshot) = next_within(&mut stream, Duration::from_millis(200)).await {
        let snapshot = snapshot.unwrap().unwrap();
        if snapshot.service("db").map(|e| !e.is_empty()).unwrap_or(false) {
            latest = Some(snapshot);
            break;
        }
    }
    assert_eq!(latest.unwrap().service("db").unwrap()[0].service_port, 5432);
}

#[tokio::test]
async fn dropping_the_stream_stops_all_fetches() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::default());
    registry.set_service("web", vec![instance("web", "web-1", 8080)]);
    registry.put_key("config/flag", "true");

    let mut stream = watcher(&registry, WatchConfig::default())
        .require(Resource::service("web"))
        .require(Resource::key("config/flag"))
        .subscribe();
    stream.next().await.unwrap().unwrap();
    drop(stream);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let before = registry.fetches().len();
    registry.put_key("config/flag", "false");
    registry.set_service("web", vec![]);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(registry.fetches().len(), before);
}

#[tokio::test]
async fn nothing_to_watch_ends_immediately() {
    let registry = Arc::new(MemoryRegistry::default());

    let mut stream = watcher(&registry, WatchConfig::default()).subscribe();

    assert!(stream.next().await.is_none());
    assert!(registry.fetches().is_empty());
}

#[tokio::test]
async fn watcher_built_from_config_gates_on_declared_dependencies() {
    enable_logger();
    let registry = Arc::new(MemoryRegistry::default());
    let settings = RegwatchConfig {
        dependencies: DependencyConfig {
            services: vec!["web".into(), "db".into()],
            keys: vec!["config/flag".into()],
            prefixes: vec!["app/".into()],
        },
        ..Default::default()
    };

    let watcher = DependencyWatcher::from_config(registry.clone(), &settings);

    let expected: DependencySet = [
        Resource::service("web"),
        Resource::service("db"),
        Resource::key("config/flag"),
        Resource::prefix("app/"),
    ]
    .into_iter()
    .collect();
    assert_eq!(watcher.required(), &expected);
    assert_eq!(watcher.resources(), expected.iter().cloned().collect());

    registry.set_service("web", vec![instance("web", "web-1", 8080)]);
    registry.set_service("db", vec![instance("db", "db-1", 5432)]);
    registry.put_key("config/flag", "true");
    registry.put_key("app/a", "1");

    let mut stream = watcher.subscribe();
    let snapshot = stream.next().await.unwrap().unwrap();

    assert_eq!(snapshot.len(), 4);
    assert_eq!(snapshot.service("web").unwrap()[0].service_id, "web-1");
    assert_eq!(snapshot.service("db").unwrap()[0].service_port, 5432);
    assert_eq!(snapshot.key_value("config/flag").unwrap().value_str(), Some("true"));
    assert!(matches!(snapshot.prefix("app/"), Some(PrefixEntry::Nodes(_))));
    assert!(stream.is_ready());
}
