pub mod memory;
pub mod probe;

pub use memory::{CloudCall, CloudInventory, InMemoryCloud};
pub use probe::{HealthProbe, HttpProbe};

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{AddressBinding, BalancerMembership, LiveState, ResourceType};

/// Provider adapter for one resource type.
#[async_trait]
pub trait CloudProvisioner: Send + Sync {
    /// `Ok(None)` when the provider no longer knows the resource.
    async fn fetch_live_state(&self, resource_id: &str) -> Result<Option<LiveState>>;

    async fn balancer_membership(
        &self,
        balancer: &str,
        resource_id: &str,
    ) -> Result<BalancerMembership>;
    async fn register_with_balancer(&self, balancer: &str, resource_id: &str) -> Result<()>;
    async fn deregister_from_balancer(&self, balancer: &str, resource_id: &str) -> Result<()>;

    async fn describe_address(&self, address: &str) -> Result<Option<AddressBinding>>;
    async fn associate_address(&self, resource_id: &str, address: &str) -> Result<()>;
    async fn disassociate_address(&self, address: &str) -> Result<()>;

    async fn terminate(&self, resource_id: &str, final_snapshot: Option<&str>) -> Result<()>;
}

/// Per-resource-type adapters, selected by dispatch.
#[derive(Clone)]
pub struct Cloud {
    compute: Arc<dyn CloudProvisioner>,
    database: Arc<dyn CloudProvisioner>,
}

impl Cloud {
    pub fn new(compute: Arc<dyn CloudProvisioner>, database: Arc<dyn CloudProvisioner>) -> Self {
        Self { compute, database }
    }

    /// One adapter serving every resource type.
    pub fn uniform(provisioner: Arc<dyn CloudProvisioner>) -> Self {
        Self {
            compute: provisioner.clone(),
            database: provisioner,
        }
    }

    pub fn for_type(&self, resource_type: ResourceType) -> Option<&dyn CloudProvisioner> {
        match resource_type {
            ResourceType::Compute => Some(self.compute.as_ref()),
            ResourceType::Database => Some(self.database.as_ref()),
            ResourceType::LoadBalancer => None,
        }
    }
}
