use std::sync::Arc;
use std::time::Duration;

use crate::cloud::{Cloud, CloudProvisioner, HealthProbe};
use crate::config::{DeploymentSpec, NodeConfig, Timings};
use crate::error::{DeployError, Result};
use crate::lifecycle::health::{self, Assessment};
use crate::storage::ResourceTracker;
use crate::types::{LiveSnapshot, LiveState, Node, ProbeOutcome, ResourceType};

/// Live-state access and mutations for individual nodes.
pub struct NodeController<T: ResourceTracker + ?Sized> {
    tracker: Arc<T>,
    cloud: Cloud,
    probe: Arc<dyn HealthProbe>,
    spec: Arc<DeploymentSpec>,
    timings: Timings,
}

impl<T: ResourceTracker + ?Sized> NodeController<T> {
    pub fn new(
        tracker: Arc<T>,
        cloud: Cloud,
        probe: Arc<dyn HealthProbe>,
        spec: Arc<DeploymentSpec>,
        timings: Timings,
    ) -> Self {
        Self {
            tracker,
            cloud,
            probe,
            spec,
            timings,
        }
    }

    pub fn config_for(&self, node: &Node) -> Option<&NodeConfig> {
        self.spec.config_for(node.resource_type, &node.name)
    }

    fn provisioner(&self, node: &Node) -> Option<&dyn CloudProvisioner> {
        self.cloud.for_type(node.resource_type)
    }

    /// Fetch a fresh snapshot. Adapter failures degrade to "not found" for
    /// the piece that failed; this never errors.
    pub async fn refresh_live_state(&self, node: &Node) -> LiveSnapshot {
        match self.snapshot(node, false).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Could not refresh live state for {}: {}", node.label(), e);
                LiveSnapshot::not_found()
            }
        }
    }

    /// Like `refresh_live_state`, but any adapter failure is returned instead
    /// of being read as "not found".
    pub async fn try_refresh_live_state(&self, node: &Node) -> Result<LiveSnapshot> {
        self.snapshot(node, true).await
    }

    async fn snapshot(&self, node: &Node, strict: bool) -> Result<LiveSnapshot> {
        let Some(provisioner) = self.provisioner(node) else {
            return Ok(LiveSnapshot::not_found());
        };

        let state = match provisioner.fetch_live_state(&node.resource_id).await {
            Ok(state) => state,
            Err(e) if strict => return Err(e.into()),
            Err(e) => {
                log::warn!("Could not fetch live state for {}: {}", node.label(), e);
                None
            }
        };

        let mut snapshot = LiveSnapshot {
            state,
            ..LiveSnapshot::not_found()
        };

        let Some(config) = self.config_for(node) else {
            return Ok(snapshot);
        };
        if node.resource_type != ResourceType::Compute {
            return Ok(snapshot);
        }

        if let Some(address) = &config.cloud.elastic_ip {
            snapshot.address = match provisioner.describe_address(address).await {
                Ok(binding) => binding,
                Err(e) if strict => return Err(e.into()),
                Err(e) => {
                    log::warn!("Could not describe address {}: {}", address, e);
                    None
                }
            };
        }

        if let Some(balancer) = &config.loadbalancer {
            snapshot.balancer = match provisioner
                .balancer_membership(balancer, &node.resource_id)
                .await
            {
                Ok(membership) => Some(membership),
                Err(e) if strict => return Err(e.into()),
                Err(e) => {
                    log::warn!("Could not read balancer {} membership: {}", balancer, e);
                    None
                }
            };
        }

        if let (Some(check), Some(LiveState::Compute {
            public_dns_name: Some(dns),
            ..
        })) = (&config.health_check, &snapshot.state)
        {
            let url = format!("http://{}{}", dns, check.status_url);
            let passed = self
                .probe
                .probe(&url, check.timeout(), &check.status_contains)
                .await;
            snapshot.probe = if passed {
                ProbeOutcome::Passed
            } else {
                ProbeOutcome::Failed
            };
            snapshot.health_check_url = Some(url);
        } else if config.health_check.is_some() {
            log::debug!("No health check url for {}: no public dns name", node.label());
        } else {
            log::debug!("No health check defined for {}; assuming healthy", node.label());
        }

        Ok(snapshot)
    }

    pub async fn assess(&self, node: &Node) -> Assessment {
        let snapshot = self.refresh_live_state(node).await;
        Assessment::classify(node, self.config_for(node), snapshot)
    }

    /// Assessment that fails when the provider can't be read.
    pub async fn try_assess(&self, node: &Node) -> Result<Assessment> {
        let snapshot = self.try_refresh_live_state(node).await?;
        Ok(Assessment::classify(node, self.config_for(node), snapshot))
    }

    pub async fn is_operational(&self, node: &Node) -> bool {
        self.assess(node).await.operational
    }

    pub async fn is_healthy(&self, node: &Node) -> bool {
        self.assess(node).await.healthy
    }

    /// `Ok(false)` only when the provider reports the resource gone or
    /// retired. A failed describe call is an error, not an answer.
    pub async fn is_actually_running(&self, node: &Node) -> Result<bool> {
        let Some(provisioner) = self.provisioner(node) else {
            return Ok(false);
        };
        let state = provisioner.fetch_live_state(&node.resource_id).await?;
        Ok(health::is_actually_running(state.as_ref()))
    }

    /// Take the node out of its balancer, if it is in one.
    pub async fn make_temporarily_inoperative(&self, node: &Node) -> Result<()> {
        if node.resource_type != ResourceType::Compute {
            return Ok(());
        }
        let (Some(provisioner), Some(config)) = (self.provisioner(node), self.config_for(node))
        else {
            return Ok(());
        };
        let Some(balancer) = &config.loadbalancer else {
            return Ok(());
        };

        let membership = provisioner
            .balancer_membership(balancer, &node.resource_id)
            .await?;
        if !membership.registered {
            log::debug!("{} not in balancer {}", node.label(), balancer);
            return Ok(());
        }

        log::info!("Removing {} from balancer {}", node.label(), balancer);
        provisioner
            .deregister_from_balancer(balancer, &node.resource_id)
            .await?;
        Ok(())
    }

    /// Release the static address (if it points here), then leave the balancer.
    pub async fn make_fully_inoperative(&self, node: &Node) -> Result<()> {
        if node.resource_type != ResourceType::Compute {
            return Ok(());
        }
        if let (Some(provisioner), Some(config)) = (self.provisioner(node), self.config_for(node)) {
            if let Some(address) = &config.cloud.elastic_ip {
                let binding = provisioner.describe_address(address).await?;
                let points_here = binding
                    .as_ref()
                    .and_then(|b| b.resource_id.as_deref())
                    == Some(node.resource_id.as_str());
                if points_here {
                    log::info!("Disassociating address {} from {}", address, node.label());
                    provisioner.disassociate_address(address).await?;
                }
            }
        }

        self.make_temporarily_inoperative(node).await
    }

    /// Point the static address at the node and register it with its
    /// balancer. Unless forced, only healthy active-generation nodes qualify.
    pub async fn make_operational(&self, node: &Node, force_operational: bool) -> Result<()> {
        if !force_operational {
            let healthy = self.is_healthy(node).await;
            if !healthy || !node.is_active_generation {
                return Err(DeployError::Precondition(format!(
                    "only healthy nodes in the active generation can be made operational: {}",
                    node
                )));
            }
        }

        if node.resource_type != ResourceType::Compute {
            return Ok(());
        }
        let (Some(provisioner), Some(config)) = (self.provisioner(node), self.config_for(node))
        else {
            return Ok(());
        };

        if let Some(address) = &config.cloud.elastic_ip {
            self.claim_address(provisioner, node, address).await?;
        }

        if let Some(balancer) = &config.loadbalancer {
            log::info!("Placing {} in balancer {}", node.label(), balancer);
            provisioner
                .register_with_balancer(balancer, &node.resource_id)
                .await?;
        }

        Ok(())
    }

    async fn claim_address(
        &self,
        provisioner: &dyn CloudProvisioner,
        node: &Node,
        address: &str,
    ) -> Result<()> {
        let holder = provisioner
            .describe_address(address)
            .await?
            .and_then(|b| b.resource_id);
        if holder.as_deref() == Some(node.resource_id.as_str()) {
            return Ok(());
        }
        if let Some(other) = holder {
            log::info!("Disassociating address {} from {}", address, other);
            provisioner.disassociate_address(address).await?;
        }

        log::info!("Pointing address {} to {}", address, node.label());
        let interval = self.timings.address_poll_interval();
        let mut waited = Duration::ZERO;
        loop {
            if let Err(e) = provisioner.associate_address(&node.resource_id, address).await {
                log::warn!("Associating {} with {} failed: {}", address, node.label(), e);
            }
            let holder = provisioner
                .describe_address(address)
                .await?
                .and_then(|b| b.resource_id);
            if holder.as_deref() == Some(node.resource_id.as_str()) {
                log::info!("Address {} associated to {}", address, node.label());
                return Ok(());
            }
            if waited >= self.timings.address_timeout() {
                return Err(DeployError::WaitTimedOut {
                    pending: vec![format!("{} (address {})", node.label(), address)],
                });
            }
            log::info!(
                "Waiting {:?} for address {} to associate to {}",
                interval,
                address,
                node.label()
            );
            tokio::time::sleep(interval).await;
            waited += interval;
        }
    }

    fn guard_destruction(&self, node: &Node, operational: bool, action: &str) -> Result<()> {
        if node.is_active_generation && operational {
            return Err(DeployError::Precondition(format!(
                "can't {} an active, operational node: {}",
                action, node
            )));
        }
        Ok(())
    }

    /// Release the backing resource and mark the record not running.
    ///
    /// Live state must be readable: the destruction guard and the decision to
    /// call the provider both depend on it.
    pub async fn terminate(&self, node: &Node) -> Result<Node> {
        let assessment = self.try_assess(node).await?;
        self.guard_destruction(node, assessment.operational, "terminate")?;

        if health::is_actually_running(assessment.snapshot.state.as_ref()) {
            if let Some(provisioner) = self.provisioner(node) {
                let final_snapshot = match node.resource_type {
                    ResourceType::Database => self
                        .config_for(node)
                        .and_then(|c| c.final_snapshot.as_deref()),
                    _ => None,
                };
                log::info!("Terminating {}", node.label());
                provisioner
                    .terminate(&node.resource_id, final_snapshot)
                    .await?;
            }
        }

        let mut retired = node.clone();
        retired.is_running = false;
        self.tracker.save(&retired).await
    }

    /// Mark the record not running without touching the resource.
    pub async fn retire(&self, node: &Node) -> Result<Node> {
        let assessment = self.try_assess(node).await?;
        self.guard_destruction(node, assessment.operational, "retire")?;

        let mut retired = node.clone();
        retired.is_running = false;
        self.tracker.save(&retired).await
    }

    /// Flip `is_running` off when the resource is gone. Returns the record as
    /// stored afterwards. A record whose live state can't be read is left
    /// as it is.
    pub async fn verify_running_state(&self, node: &Node) -> Result<Node> {
        if !node.is_running {
            return Ok(node.clone());
        }
        match self.is_actually_running(node).await {
            Ok(true) => Ok(node.clone()),
            Ok(false) => {
                log::info!("{} is no longer running; updating its record", node.label());
                let mut stale = node.clone();
                stale.is_running = false;
                self.tracker.save(&stale).await
            }
            Err(e) => {
                log::warn!(
                    "Could not verify {} is running, leaving its record alone: {}",
                    node.label(),
                    e
                );
                Ok(node.clone())
            }
        }
    }

    pub async fn set_initial_deploy_complete(&self, node: &Node) -> Result<Node> {
        let mut done = node.clone();
        done.initial_deploy_complete = true;
        self.tracker.save(&done).await
    }

    pub async fn launch_time(&self, node: &Node) -> Option<chrono::DateTime<chrono::Utc>> {
        let provisioner = self.provisioner(node)?;
        match provisioner.fetch_live_state(&node.resource_id).await {
            Ok(state) => state.and_then(|s| s.launched_at()),
            Err(e) => {
                log::warn!("Could not fetch live state for {}: {}", node.label(), e);
                None
            }
        }
    }
}
