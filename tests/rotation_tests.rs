mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{Harness, ADDRESS, BALANCER};
use genroll::cloud::{CloudCall, InMemoryCloud};
use genroll::decision::{Arbiter, DecisionRequest, Scripted, Verdict};
use genroll::engine::{RotationOptions, RotationState};
use genroll::DeployError;

fn seamless() -> RotationOptions {
    RotationOptions {
        force_seamless: true,
        force_operational: false,
    }
}

#[tokio::test]
async fn test_aborts_before_disruption_without_redundancy() {
    let harness = Harness::new();
    let web1 = harness.seed_serving("web1", "i-1", 1, true);

    let deployment = harness.deployment();
    let ran = AtomicBool::new(false);
    let flag = &ran;
    let err = deployment
        .with_rotation(Some(&web1), seamless(), || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::InsufficientRedundancy(_)));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(harness.cloud.calls().is_empty());
    assert!(harness.in_balancer("i-1"));
}

#[tokio::test]
async fn test_rotates_out_and_back_with_peer() {
    let harness = Harness::new();
    let web1 = harness.seed_serving("web1", "i-1", 1, true);
    let web2 = harness.seed_serving("web2", "i-2", 1, true);

    let deployment = harness.deployment();
    let cloud = harness.cloud.clone();
    let rotation = deployment
        .with_rotation(Some(&web1), seamless(), || async move {
            let members = cloud.inventory().balancers[BALANCER].clone();
            Ok(members.contains_key("i-1"))
        })
        .await
        .unwrap();

    assert!(!rotation.value, "node should be out of the balancer during the body");
    assert_eq!(rotation.state, RotationState::Operational);
    assert_eq!(
        harness.cloud.calls(),
        vec![
            CloudCall::Deregister {
                balancer: BALANCER.to_string(),
                resource_id: "i-1".to_string(),
            },
            CloudCall::Register {
                balancer: BALANCER.to_string(),
                resource_id: "i-1".to_string(),
            },
        ]
    );
    assert!(deployment.nodes().is_operational(&web1).await);
    assert!(deployment.nodes().is_operational(&web2).await);
}

#[tokio::test]
async fn test_operator_may_accept_interruption() {
    let harness = Harness::new();
    let web1 = harness.seed_serving("web1", "i-1", 1, true);

    let arbiter = Arc::new(Scripted::new([Verdict::Proceed]));
    let deployment = harness.interactive(arbiter.clone());
    let rotation = deployment
        .with_rotation(Some(&web1), seamless(), || async { Ok(()) })
        .await
        .unwrap();

    assert_eq!(rotation.state, RotationState::Operational);
    assert!(matches!(
        arbiter.requests().as_slice(),
        [DecisionRequest::InterruptService { .. }]
    ));
    assert!(deployment.nodes().is_operational(&web1).await);
}

#[tokio::test]
async fn test_operator_may_refuse_interruption() {
    let harness = Harness::new();
    let web1 = harness.seed_serving("web1", "i-1", 1, true);

    let arbiter = Arc::new(Scripted::new([Verdict::Fail]));
    let deployment = harness.interactive(arbiter);
    let err = deployment
        .with_rotation(Some(&web1), seamless(), || async { Ok(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::InsufficientRedundancy(_)));
    assert!(harness.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_redundancy_not_checked_unless_seamless_forced() {
    let harness = Harness::new();
    let web1 = harness.seed_serving("web1", "i-1", 1, true);

    let deployment = harness.deployment();
    let rotation = deployment
        .with_rotation(Some(&web1), RotationOptions::default(), || async { Ok(7) })
        .await
        .unwrap();

    assert_eq!(rotation.value, 7);
    assert_eq!(harness.cloud.calls().len(), 2);
}

#[tokio::test]
async fn test_restores_node_when_body_fails() {
    let harness = Harness::new();
    let web1 = harness.seed_serving("web1", "i-1", 1, true);
    harness.seed_serving("web2", "i-2", 1, true);

    let deployment = harness.deployment();
    let err = deployment
        .with_rotation(Some(&web1), seamless(), || async {
            Err::<(), _>(DeployError::Precondition("deploy step failed".to_string()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Precondition(ref m) if m == "deploy step failed"));
    assert!(deployment.nodes().is_operational(&web1).await);
}

#[tokio::test]
async fn test_node_not_serving_is_left_alone() {
    let harness = Harness::new();
    let web1 = harness.seed_compute("web1", "i-1", 1, true);
    harness.seed_serving("web2", "i-2", 1, true);

    let deployment = harness.deployment();
    let rotation = deployment
        .with_rotation(Some(&web1), seamless(), || async { Ok(()) })
        .await
        .unwrap();

    assert_eq!(rotation.state, RotationState::Operational);
    assert!(harness.cloud.calls().is_empty());
    assert!(!harness.in_balancer("i-1"));
}

#[tokio::test]
async fn test_failed_restore_can_be_ignored() {
    let harness = Harness::new();
    let web1 = harness.seed_serving("web1", "i-1", 1, true);
    harness.seed_serving("web2", "i-2", 1, true);

    let arbiter = Arc::new(Scripted::new([Verdict::Ignore]));
    let deployment = harness.interactive(arbiter.clone());
    let cloud = harness.cloud.clone();
    let rotation = deployment
        .with_rotation(Some(&web1), seamless(), || async move {
            cloud.fail_register(true);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(rotation.state, RotationState::Degraded);
    assert!(rotation.is_degraded());
    assert!(matches!(
        arbiter.requests().as_slice(),
        [DecisionRequest::RestoreFailed { .. }]
    ));
    assert!(!harness.in_balancer("i-1"));
}

#[tokio::test]
async fn test_failed_restore_aborts_unattended_run() {
    let harness = Harness::new();
    let web1 = harness.seed_serving("web1", "i-1", 1, true);
    harness.seed_serving("web2", "i-2", 1, true);

    let deployment = harness.deployment();
    let cloud = harness.cloud.clone();
    let err = deployment
        .with_rotation(Some(&web1), seamless(), || async move {
            cloud.fail_register(true);
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::OperatorAborted(_)));
}

/// Clears the injected fault and asks for another round.
struct HealingArbiter {
    cloud: Arc<InMemoryCloud>,
}

impl Arbiter for HealingArbiter {
    fn decide(&self, _request: &DecisionRequest) -> Verdict {
        self.cloud.fail_register(false);
        Verdict::Retry
    }
}

#[tokio::test]
async fn test_retry_restarts_restoration() {
    let harness = Harness::new();
    let web1 = harness.seed_serving("web1", "i-1", 1, true);
    harness.seed_serving("web2", "i-2", 1, true);

    let deployment = harness.interactive(Arc::new(HealingArbiter {
        cloud: harness.cloud.clone(),
    }));
    let cloud = harness.cloud.clone();
    let rotation = deployment
        .with_rotation(Some(&web1), seamless(), || async move {
            cloud.fail_register(true);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(rotation.state, RotationState::Operational);
    assert!(deployment.nodes().is_operational(&web1).await);
}

#[tokio::test]
async fn test_new_node_restoration_repairs_generation() {
    let harness = Harness::new();
    harness.seed_serving("web1", "i-1", 1, true);

    let deployment = harness.deployment();
    let tracked = harness.clone();
    let rotation = deployment
        .with_rotation(
            None,
            RotationOptions {
                force_seamless: true,
                force_operational: true,
            },
            || async move {
                tracked.seed_compute("web2", "i-2", 1, true);
                Ok(())
            },
        )
        .await
        .unwrap();

    assert_eq!(rotation.state, RotationState::Operational);
    assert!(harness.in_balancer("i-2"));
    assert!(deployment.active_is_fully_operational().await.unwrap());
}

#[tokio::test]
async fn test_new_node_restoration_escalates_when_generation_degraded() {
    let harness = Harness::new();
    harness.seed_serving("web1", "i-1", 1, true);

    let arbiter = Arc::new(Scripted::new([Verdict::Ignore]));
    let deployment = harness.interactive(arbiter.clone());
    let rotation = deployment
        .with_rotation(
            None,
            RotationOptions {
                force_seamless: true,
                force_operational: true,
            },
            || async { Ok(()) },
        )
        .await
        .unwrap();

    assert!(rotation.is_degraded());
    assert!(matches!(
        arbiter.requests().as_slice(),
        [DecisionRequest::GenerationDegraded { .. }]
    ));
}

#[tokio::test]
async fn test_new_node_restoration_escalates_when_register_fails() {
    let harness = Harness::new();
    harness.seed_serving("web1", "i-1", 1, true);

    let arbiter = Arc::new(Scripted::new([Verdict::Ignore]));
    let deployment = harness.interactive(arbiter.clone());
    let tracked = harness.clone();
    let rotation = deployment
        .with_rotation(
            None,
            RotationOptions {
                force_seamless: true,
                force_operational: true,
            },
            || async move {
                tracked.seed_compute("web2", "i-2", 1, true);
                tracked.cloud.fail_register(true);
                Ok(())
            },
        )
        .await
        .unwrap();

    assert!(rotation.is_degraded());
    assert!(matches!(
        arbiter.requests().as_slice(),
        [DecisionRequest::GenerationDegraded { .. }]
    ));
    assert!(!harness.in_balancer("i-2"));
}

#[tokio::test]
async fn test_rotation_keeps_static_address() {
    let harness = Harness::with_spec(common::create_addressed_spec());
    let web1 = harness.seed_serving("web1", "i-1", 1, true);
    harness.seed_serving("web2", "i-2", 1, true);
    harness.cloud.add_address(ADDRESS, Some("i-1"));

    let deployment = harness.deployment();
    let tracked = harness.clone();
    let rotation = deployment
        .with_rotation(Some(&web1), seamless(), || async move {
            Ok(tracked.address_holder())
        })
        .await
        .unwrap();

    assert_eq!(rotation.state, RotationState::Operational);
    assert_eq!(rotation.value.as_deref(), Some("i-1"));
    assert_eq!(
        harness.cloud.calls(),
        vec![
            CloudCall::Deregister {
                balancer: BALANCER.to_string(),
                resource_id: "i-1".to_string(),
            },
            CloudCall::Register {
                balancer: BALANCER.to_string(),
                resource_id: "i-1".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_node_without_its_address_is_not_rotated() {
    let harness = Harness::with_spec(common::create_addressed_spec());
    let web1 = harness.seed_serving("web1", "i-1", 1, true);
    harness.seed_serving("web2", "i-2", 1, true);
    harness.cloud.add_address(ADDRESS, Some("i-elsewhere"));

    let deployment = harness.deployment();
    assert!(!deployment.nodes().is_operational(&web1).await);

    let rotation = deployment
        .with_rotation(Some(&web1), seamless(), || async { Ok(()) })
        .await
        .unwrap();

    assert_eq!(rotation.state, RotationState::Operational);
    assert!(harness.cloud.calls().is_empty());
    assert_eq!(harness.address_holder().as_deref(), Some("i-elsewhere"));
}
