mod common;

use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{create_test_spec, BALANCER, KEYPAIR};
use genroll::cloud::{Cloud, HealthProbe, HttpProbe, InMemoryCloud};
use genroll::config::HealthCheckConfig;
use genroll::storage::InMemoryTracker;
use genroll::types::{InstanceState, Node, ProbeOutcome, ResourceType};
use genroll::{DeployContext, Deployment};

async fn start_status_server() -> SocketAddr {
    let app = Router::new()
        .route("/status", get(|| async { "status: OK" }))
        .route("/broken", get(|| async { "status: DEGRADED" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "status: OK"
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_probe_passes_with_marker() {
    let addr = start_status_server().await;
    let probe = HttpProbe::new().unwrap();

    let url = format!("http://{}/status", addr);
    assert!(probe.probe(&url, Duration::from_secs(2), "OK").await);
}

#[tokio::test]
async fn test_probe_fails_without_marker() {
    let addr = start_status_server().await;
    let probe = HttpProbe::new().unwrap();

    let url = format!("http://{}/broken", addr);
    assert!(!probe.probe(&url, Duration::from_secs(2), "OK").await);
}

#[tokio::test]
async fn test_probe_times_out() {
    let addr = start_status_server().await;
    let probe = HttpProbe::new().unwrap();

    let url = format!("http://{}/slow", addr);
    assert!(!probe.probe(&url, Duration::from_millis(50), "OK").await);
}

#[tokio::test]
async fn test_probe_connection_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let probe = HttpProbe::new().unwrap();
    let url = format!("http://{}/status", addr);
    assert!(!probe.probe(&url, Duration::from_secs(2), "OK").await);
}

#[tokio::test]
async fn test_health_check_drives_classification() {
    let addr = start_status_server().await;

    let mut spec = create_test_spec();
    for (path, role) in [("/status", "web1"), ("/broken", "web2")] {
        let conf = spec.compute.get_mut(role).unwrap();
        conf.health_check = Some(HealthCheckConfig {
            status_url: path.to_string(),
            status_contains: "OK".to_string(),
            timeout_secs: 2,
        });
    }

    let cloud = Arc::new(InMemoryCloud::new());
    cloud.add_balancer(BALANCER);
    let tracker = Arc::new(InMemoryTracker::new());
    let mut nodes = Vec::new();
    for (role, id) in [("web1", "i-1"), ("web2", "i-2")] {
        cloud.add_compute(id, InstanceState::Running, KEYPAIR);
        cloud.set_public_dns_name(id, &addr.to_string());
        let node = Node::new(common::DEPLOYMENT, ResourceType::Compute, id, role, 1, true);
        tracker.seed(node.clone());
        nodes.push(node);
    }

    let deployment = Deployment::new(
        DeployContext::new(common::DEPLOYMENT, common::credentials())
            .with_timings(common::fast_timings()),
        spec,
        tracker,
        Cloud::uniform(cloud.clone()),
        Arc::new(HttpProbe::new().unwrap()),
    );

    let passing = deployment.nodes().assess(&nodes[0]).await;
    assert!(passing.healthy);
    assert_eq!(passing.snapshot.probe, ProbeOutcome::Passed);
    assert_eq!(
        passing.snapshot.health_check_url,
        Some(format!("http://{}/status", addr))
    );

    let failing = deployment.nodes().assess(&nodes[1]).await;
    assert!(!failing.healthy);
    assert!(!failing.operational);
    assert_eq!(failing.snapshot.probe, ProbeOutcome::Failed);

    let unhealthy = deployment.get_unhealthy_active_nodes().await.unwrap();
    assert_eq!(unhealthy.len(), 1);
    assert_eq!(unhealthy[0].node().unwrap().name, "web2");
}

#[tokio::test]
async fn test_missing_dns_name_skips_probe() {
    let mut spec = create_test_spec();
    spec.compute.get_mut("web1").unwrap().health_check = Some(HealthCheckConfig {
        status_url: "/status".to_string(),
        status_contains: "OK".to_string(),
        timeout_secs: 1,
    });

    let harness = common::Harness::with_spec(spec);
    let web1 = harness.seed_compute("web1", "i-1", 1, true);

    let deployment = harness.deployment();
    let assessment = deployment.nodes().assess(&web1).await;

    assert!(assessment.healthy);
    assert_eq!(assessment.snapshot.probe, ProbeOutcome::NotConfigured);
    assert!(harness.probe.seen().is_empty());
}
