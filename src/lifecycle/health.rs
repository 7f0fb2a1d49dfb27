//! Operational and health classification of a node against one live snapshot.
//!
//! Healthy: the resource is able to do its job (running, right credential,
//! passing its probe). Operational: healthy *and* wired into traffic (static
//! address points at it, balancer has it in service). Missing configuration
//! always classifies as `false`.

use crate::config::NodeConfig;
use crate::types::{
    DbStatus, InstanceState, LiveSnapshot, LiveState, Node, ProbeOutcome, ResourceType,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub operational: bool,
    pub healthy: bool,
    pub snapshot: LiveSnapshot,
}

impl Assessment {
    pub fn classify(node: &Node, config: Option<&NodeConfig>, snapshot: LiveSnapshot) -> Self {
        Self {
            operational: is_operational(node, config, &snapshot),
            healthy: is_healthy(node, config, &snapshot),
            snapshot,
        }
    }
}

/// The provider still has the resource and it is not in a terminal state.
pub fn is_actually_running(state: Option<&LiveState>) -> bool {
    match state {
        Some(LiveState::Compute { state, .. }) => !state.is_retired(),
        Some(LiveState::Database { status, .. }) => !status.is_retired(),
        None => false,
    }
}

pub fn is_healthy(node: &Node, config: Option<&NodeConfig>, snapshot: &LiveSnapshot) -> bool {
    let Some(config) = config else {
        log::error!(
            "No deployment configuration found for node {}; assuming NOT healthy",
            node
        );
        return false;
    };

    match node.resource_type {
        ResourceType::Compute => {
            compute_is_sound(node, config, snapshot) && snapshot.probe != ProbeOutcome::Failed
        }
        ResourceType::Database => database_is_available(node, snapshot),
        ResourceType::LoadBalancer => false,
    }
}

pub fn is_operational(node: &Node, config: Option<&NodeConfig>, snapshot: &LiveSnapshot) -> bool {
    let Some(config) = config else {
        log::error!(
            "No deployment configuration found for node {}; assuming NOT operational",
            node
        );
        return false;
    };

    match node.resource_type {
        ResourceType::Compute => {
            if !compute_is_sound(node, config, snapshot) {
                return false;
            }
            if snapshot.probe == ProbeOutcome::Failed {
                log::debug!("is_operational: {} fails its health check", node.label());
                return false;
            }
            if let Some(address) = &config.cloud.elastic_ip {
                let points_here = snapshot
                    .address
                    .as_ref()
                    .and_then(|b| b.resource_id.as_deref())
                    == Some(node.resource_id.as_str());
                if !points_here {
                    log::debug!(
                        "is_operational: {} does not hold address {}",
                        node.label(),
                        address
                    );
                    return false;
                }
            }
            if let Some(balancer) = &config.loadbalancer {
                let in_service = snapshot
                    .balancer
                    .as_ref()
                    .map(|m| m.is_in_service())
                    .unwrap_or(false);
                if !in_service {
                    log::debug!(
                        "is_operational: {} not in service in balancer {} ({:?})",
                        node.label(),
                        balancer,
                        snapshot.balancer
                    );
                    return false;
                }
            }
            true
        }
        ResourceType::Database => database_is_available(node, snapshot),
        ResourceType::LoadBalancer => false,
    }
}

fn compute_is_sound(node: &Node, config: &NodeConfig, snapshot: &LiveSnapshot) -> bool {
    let Some(LiveState::Compute {
        state, key_name, ..
    }) = &snapshot.state
    else {
        log::debug!("{} has no live compute instance", node.label());
        return false;
    };

    if *state != InstanceState::Running {
        log::debug!("{} not running ({:?})", node.label(), state);
        return false;
    }

    let Some(keypair) = config.cloud.keypair.as_deref() else {
        log::error!("No keypair configured for {}", node.label());
        return false;
    };
    if key_name.as_deref() != Some(keypair) {
        log::debug!("{} has wrong key {:?}", node.label(), key_name);
        return false;
    }

    true
}

fn database_is_available(node: &Node, snapshot: &LiveSnapshot) -> bool {
    match &snapshot.state {
        Some(LiveState::Database { status, .. }) if *status == DbStatus::Available => true,
        other => {
            log::debug!("{} not available ({:?})", node.label(), other);
            false
        }
    }
}

/// Status prefix for listings: `RETIRED-`, or `UP-`/`INACTIVE-` followed by
/// `UNHEALTHY-` when applicable.
pub fn status_label(node: &Node, assessment: Option<&Assessment>) -> String {
    let mut status = String::new();
    match assessment {
        Some(a) if node.is_running => {
            status.push_str(if a.operational { "UP-" } else { "INACTIVE-" });
            if !a.healthy {
                status.push_str("UNHEALTHY-");
            }
        }
        _ => status.push_str("RETIRED-"),
    }
    format!("{}-{}", status, node)
}
