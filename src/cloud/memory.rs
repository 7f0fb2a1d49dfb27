use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use super::CloudProvisioner;
use crate::config::Credentials;
use crate::error::DeployError;
use crate::types::{
    AddressBinding, BalancerMembership, DbStatus, InstanceState, LiveState,
};

/// Provider-side state: instances, static address bindings and balancer
/// members (balancer -> resource id -> reported health).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudInventory {
    /// Access key id of the account the inventory belongs to.
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub instances: BTreeMap<String, LiveState>,
    #[serde(default)]
    pub addresses: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub balancers: BTreeMap<String, BTreeMap<String, String>>,
}

/// Mutating calls, in the order they reached the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    Register { balancer: String, resource_id: String },
    Deregister { balancer: String, resource_id: String },
    Associate { resource_id: String, address: String },
    Disassociate { address: String },
    Terminate { resource_id: String, final_snapshot: Option<String> },
}

#[derive(Debug, Clone)]
struct Faults {
    fail_fetch: bool,
    fail_register: bool,
    fail_associate: bool,
    registered_health: String,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            fail_fetch: false,
            fail_register: false,
            fail_associate: false,
            registered_health: BalancerMembership::IN_SERVICE.to_string(),
        }
    }
}

/// Provisioner backed by an in-process inventory. Serves offline runs from a
/// JSON state file and doubles as the test adapter.
#[derive(Debug, Default)]
pub struct InMemoryCloud {
    inventory: RwLock<CloudInventory>,
    calls: Mutex<Vec<CloudCall>>,
    faults: RwLock<Faults>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inventory(inventory: CloudInventory) -> Self {
        Self {
            inventory: RwLock::new(inventory),
            ..Self::default()
        }
    }

    /// Open `inventory` on behalf of the account `credentials` identify. An
    /// inventory written by another account is refused.
    pub fn for_account(
        mut inventory: CloudInventory,
        credentials: &Credentials,
    ) -> crate::error::Result<Self> {
        if let Some(account) = inventory.account.as_deref() {
            if account != credentials.access_key_id {
                return Err(DeployError::Config(format!(
                    "provider inventory belongs to account {}, not {}",
                    account, credentials.access_key_id
                )));
            }
        }
        inventory.account = Some(credentials.access_key_id.clone());
        Ok(Self::from_inventory(inventory))
    }

    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_inventory(serde_json::from_str(&raw)?))
    }

    pub fn persist(&self, path: &Path) -> crate::error::Result<()> {
        let raw = serde_json::to_string_pretty(&self.inventory())?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn inventory(&self) -> CloudInventory {
        self.inventory
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn add_compute(&self, resource_id: &str, state: InstanceState, key_name: &str) {
        self.add_instance(
            resource_id,
            LiveState::Compute {
                state,
                key_name: Some(key_name.to_string()),
                public_dns_name: None,
                launched_at: Some(chrono::Utc::now()),
            },
        );
    }

    pub fn add_database(&self, resource_id: &str, status: DbStatus) {
        self.add_instance(
            resource_id,
            LiveState::Database {
                status,
                created_at: Some(chrono::Utc::now()),
            },
        );
    }

    pub fn add_instance(&self, resource_id: &str, state: LiveState) {
        self.write().instances.insert(resource_id.to_string(), state);
    }

    pub fn remove_instance(&self, resource_id: &str) {
        self.write().instances.remove(resource_id);
    }

    pub fn set_public_dns_name(&self, resource_id: &str, dns_name: &str) {
        if let Some(LiveState::Compute {
            public_dns_name, ..
        }) = self.write().instances.get_mut(resource_id)
        {
            *public_dns_name = Some(dns_name.to_string());
        }
    }

    pub fn add_address(&self, address: &str, resource_id: Option<&str>) {
        self.write()
            .addresses
            .insert(address.to_string(), resource_id.map(str::to_string));
    }

    pub fn add_balancer(&self, balancer: &str) {
        self.write()
            .balancers
            .entry(balancer.to_string())
            .or_default();
    }

    pub fn set_member_health(&self, balancer: &str, resource_id: &str, health: &str) {
        self.write()
            .balancers
            .entry(balancer.to_string())
            .or_default()
            .insert(resource_id.to_string(), health.to_string());
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.faults_mut().fail_fetch = fail;
    }

    pub fn fail_register(&self, fail: bool) {
        self.faults_mut().fail_register = fail;
    }

    pub fn fail_associate(&self, fail: bool) {
        self.faults_mut().fail_associate = fail;
    }

    /// Health newly registered members report, `InService` by default.
    pub fn set_registered_health(&self, health: &str) {
        self.faults_mut().registered_health = health.to_string();
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CloudInventory> {
        self.inventory.write().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> Faults {
        self.faults.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn faults_mut(&self) -> std::sync::RwLockWriteGuard<'_, Faults> {
        self.faults.write().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: CloudCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl CloudProvisioner for InMemoryCloud {
    async fn fetch_live_state(&self, resource_id: &str) -> Result<Option<LiveState>> {
        if self.faults().fail_fetch {
            return Err(anyhow!("describe call failed for {}", resource_id));
        }
        let inventory = self.inventory.read().unwrap_or_else(|e| e.into_inner());
        Ok(inventory.instances.get(resource_id).cloned())
    }

    async fn balancer_membership(
        &self,
        balancer: &str,
        resource_id: &str,
    ) -> Result<BalancerMembership> {
        let inventory = self.inventory.read().unwrap_or_else(|e| e.into_inner());
        let members = inventory
            .balancers
            .get(balancer)
            .ok_or_else(|| anyhow!("no such load balancer: {}", balancer))?;
        let health = members.get(resource_id).cloned();

        Ok(BalancerMembership {
            balancer: balancer.to_string(),
            registered: health.is_some(),
            health,
        })
    }

    async fn register_with_balancer(&self, balancer: &str, resource_id: &str) -> Result<()> {
        let faults = self.faults();
        if faults.fail_register {
            return Err(anyhow!("register {} with {} rejected", resource_id, balancer));
        }
        {
            let mut inventory = self.write();
            let members = inventory
                .balancers
                .get_mut(balancer)
                .ok_or_else(|| anyhow!("no such load balancer: {}", balancer))?;
            members.insert(resource_id.to_string(), faults.registered_health);
        }
        self.record(CloudCall::Register {
            balancer: balancer.to_string(),
            resource_id: resource_id.to_string(),
        });
        Ok(())
    }

    async fn deregister_from_balancer(&self, balancer: &str, resource_id: &str) -> Result<()> {
        {
            let mut inventory = self.write();
            let members = inventory
                .balancers
                .get_mut(balancer)
                .ok_or_else(|| anyhow!("no such load balancer: {}", balancer))?;
            members.remove(resource_id);
        }
        self.record(CloudCall::Deregister {
            balancer: balancer.to_string(),
            resource_id: resource_id.to_string(),
        });
        Ok(())
    }

    async fn describe_address(&self, address: &str) -> Result<Option<AddressBinding>> {
        let inventory = self.inventory.read().unwrap_or_else(|e| e.into_inner());
        Ok(inventory
            .addresses
            .get(address)
            .map(|resource_id| AddressBinding {
                address: address.to_string(),
                resource_id: resource_id.clone(),
            }))
    }

    async fn associate_address(&self, resource_id: &str, address: &str) -> Result<()> {
        if self.faults().fail_associate {
            return Err(anyhow!("associate {} with {} rejected", address, resource_id));
        }
        {
            let mut inventory = self.write();
            let binding = inventory
                .addresses
                .get_mut(address)
                .ok_or_else(|| anyhow!("no such address: {}", address))?;
            *binding = Some(resource_id.to_string());
        }
        self.record(CloudCall::Associate {
            resource_id: resource_id.to_string(),
            address: address.to_string(),
        });
        Ok(())
    }

    async fn disassociate_address(&self, address: &str) -> Result<()> {
        {
            let mut inventory = self.write();
            let binding = inventory
                .addresses
                .get_mut(address)
                .ok_or_else(|| anyhow!("no such address: {}", address))?;
            *binding = None;
        }
        self.record(CloudCall::Disassociate {
            address: address.to_string(),
        });
        Ok(())
    }

    async fn terminate(&self, resource_id: &str, final_snapshot: Option<&str>) -> Result<()> {
        {
            let mut inventory = self.write();
            let state = inventory
                .instances
                .get_mut(resource_id)
                .ok_or_else(|| anyhow!("no such resource: {}", resource_id))?;
            match state {
                LiveState::Compute { state, .. } => *state = InstanceState::Terminated,
                LiveState::Database { status, .. } => *status = DbStatus::Deleted,
            }
            for members in inventory.balancers.values_mut() {
                members.remove(resource_id);
            }
        }
        self.record(CloudCall::Terminate {
            resource_id: resource_id.to_string(),
            final_snapshot: final_snapshot.map(str::to_string),
        });
        Ok(())
    }
}
