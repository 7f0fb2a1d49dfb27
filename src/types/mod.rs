pub mod live;
pub mod node;

pub use live::{
    AddressBinding, BalancerMembership, DbStatus, InstanceState, LiveSnapshot, LiveState,
    ProbeOutcome,
};
pub use node::Node;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type NodeId = Uuid;
pub type GenerationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Compute,
    Database,
    LoadBalancer,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Compute => "compute",
            ResourceType::Database => "database",
            ResourceType::LoadBalancer => "loadbalancer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "compute" => Some(ResourceType::Compute),
            "database" => Some(ResourceType::Database),
            "loadbalancer" => Some(ResourceType::LoadBalancer),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label of a generation relative to the deployment's active id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Generation {
    Active,
    Pending,
    Old,
}

impl Generation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Generation::Active => "ACTIVE",
            Generation::Pending => "PENDING",
            Generation::Old => "OLD",
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
