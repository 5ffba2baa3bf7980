//! Integration tests for the health lifecycle and its effect on routing
//!
//! Drives the health monitor's sweep directly and verifies that node state
//! transitions change what the selector hands out.

use georoute::balance::Selector;
use georoute::health::HealthMonitor;
use georoute::metrics::Metrics;
use georoute::region::Region;
use georoute::registry::{NodeRegistry, Registration};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn register_backend(registry: &NodeRegistry, id: &str, server: &MockServer, capacity: u32) {
    let addr = server.address();
    registry
        .register(Registration {
            id: id.to_string(),
            port: addr.port(),
            region: Region::UsEast,
            capacity,
            hostname: addr.ip().to_string(),
            url: server.uri(),
        })
        .await
        .expect("should register");
}

fn monitor_for(registry: Arc<NodeRegistry>) -> HealthMonitor {
    HealthMonitor::new(
        registry,
        Arc::new(Metrics::new().expect("metrics should build")),
        Duration::from_millis(500),
        Duration::from_secs(60),
    )
}

async fn mount_health(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_unhealthy_node_leaves_selection_until_recovery() {
    let healthy = MockServer::start().await;
    let flaky = MockServer::start().await;
    mount_health(&healthy, 200).await;
    // Fails twice, then recovers
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&flaky)
        .await;
    mount_health(&flaky, 200).await;

    let registry = Arc::new(NodeRegistry::new());
    // The flaky node outranks the healthy one while available
    register_backend(&registry, "flaky", &flaky, 1).await;
    register_backend(&registry, "steady", &healthy, 10).await;
    let selector = Selector::new(registry.clone());
    let monitor = monitor_for(registry.clone());

    let picked = selector.allocate(Region::UsEast, None).await.unwrap();
    assert_eq!(picked.id, "flaky");

    // First failed sweep marks the flaky node unavailable
    monitor.run_sweep().await;
    let picked = selector.allocate(Region::UsEast, None).await.unwrap();
    assert_eq!(picked.id, "steady");

    // Second sweep still fails; third succeeds and restores it
    monitor.run_sweep().await;
    monitor.run_sweep().await;
    let picked = selector.allocate(Region::UsEast, None).await.unwrap();
    assert_eq!(picked.id, "flaky");
}

#[tokio::test]
async fn test_persistent_failure_removes_node_permanently() {
    let dying = MockServer::start().await;
    mount_health(&dying, 500).await;

    let registry = Arc::new(NodeRegistry::new());
    register_backend(&registry, "dying", &dying, 2).await;
    let selector = Selector::new(registry.clone());
    let monitor = monitor_for(registry.clone()).with_cooldown_window(Duration::ZERO);

    // Three failures enter cooldown; the fourth sweep is the gating probe,
    // which also fails and prunes the node.
    for _ in 0..4 {
        monitor.run_sweep().await;
    }
    assert_eq!(registry.node_count().await, 0);
    assert!(selector.allocate(Region::UsEast, None).await.is_none());
}

#[tokio::test]
async fn test_cooldown_node_rejoins_after_recovery_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    mount_health(&server, 200).await;

    let registry = Arc::new(NodeRegistry::new());
    register_backend(&registry, "phoenix", &server, 2).await;
    let selector = Selector::new(registry.clone());
    let monitor = monitor_for(registry.clone()).with_cooldown_window(Duration::ZERO);

    for _ in 0..3 {
        monitor.run_sweep().await;
    }
    assert!(selector.allocate(Region::UsEast, None).await.is_none());

    // Gating probe succeeds: back in rotation with a clean slate
    monitor.run_sweep().await;
    let picked = selector.allocate(Region::UsEast, None).await.unwrap();
    assert_eq!(picked.id, "phoenix");
}

#[tokio::test]
async fn test_sweeps_only_touch_registered_nodes() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;

    let registry = Arc::new(NodeRegistry::new());
    register_backend(&registry, "s1", &server, 2).await;
    let monitor = monitor_for(registry.clone());

    monitor.run_sweep().await;
    registry.deregister("s1", Region::UsEast, &server.uri()).await;
    monitor.run_sweep().await;

    // One probe before deregistration, none after
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
