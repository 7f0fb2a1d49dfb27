use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    pub fn is_retired(&self) -> bool {
        matches!(self, InstanceState::ShuttingDown | InstanceState::Terminated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DbStatus {
    Creating,
    Available,
    BackingUp,
    Modifying,
    Rebooting,
    Failed,
    Deleting,
    Deleted,
}

impl DbStatus {
    pub fn is_retired(&self) -> bool {
        matches!(self, DbStatus::Deleted)
    }
}

/// Provider-side view of one resource, as returned by `fetch_live_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LiveState {
    Compute {
        state: InstanceState,
        key_name: Option<String>,
        public_dns_name: Option<String>,
        launched_at: Option<DateTime<Utc>>,
    },
    Database {
        status: DbStatus,
        created_at: Option<DateTime<Utc>>,
    },
}

impl LiveState {
    pub fn launched_at(&self) -> Option<DateTime<Utc>> {
        match self {
            LiveState::Compute { launched_at, .. } => *launched_at,
            LiveState::Database { created_at, .. } => *created_at,
        }
    }
}

/// Where a static address currently points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBinding {
    pub address: String,
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancerMembership {
    pub balancer: String,
    pub registered: bool,
    /// Balancer-reported health, e.g. `InService`.
    pub health: Option<String>,
}

impl BalancerMembership {
    pub const IN_SERVICE: &'static str = "InService";

    pub fn is_in_service(&self) -> bool {
        self.registered && self.health.as_deref() == Some(Self::IN_SERVICE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No probe configured, or nothing to probe against.
    NotConfigured,
    Passed,
    Failed,
}

/// Immutable live view of one node, gathered once per decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSnapshot {
    pub state: Option<LiveState>,
    pub address: Option<AddressBinding>,
    pub balancer: Option<BalancerMembership>,
    pub probe: ProbeOutcome,
    pub health_check_url: Option<String>,
}

impl LiveSnapshot {
    pub fn not_found() -> Self {
        Self {
            state: None,
            address: None,
            balancer: None,
            probe: ProbeOutcome::NotConfigured,
            health_check_url: None,
        }
    }
}
