use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::cloud::{Cloud, HealthProbe};
use crate::config::DeploymentSpec;
use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::lifecycle::NodeController;
use crate::storage::{NodeFilter, ResourceTracker};
use crate::types::{Generation, GenerationId, Node, ResourceType};

/// A configured role as seen in one generation: either a tracked node or a
/// placeholder for a role nothing is filling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEntry {
    Tracked(Node),
    Missing {
        resource_type: ResourceType,
        name: String,
    },
}

impl FleetEntry {
    pub fn node(&self) -> Option<&Node> {
        match self {
            FleetEntry::Tracked(node) => Some(node),
            FleetEntry::Missing { .. } => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FleetEntry::Missing { .. })
    }

    pub fn label(&self) -> String {
        match self {
            FleetEntry::Tracked(node) => node.label(),
            FleetEntry::Missing {
                resource_type,
                name,
            } => format!("{}:{}[missing]", resource_type, name),
        }
    }
}

#[derive(Debug, Default)]
struct GenerationCache {
    active: Option<GenerationId>,
}

/// Generation view of one named deployment.
pub struct Deployment<T: ResourceTracker + ?Sized> {
    context: DeployContext,
    spec: Arc<DeploymentSpec>,
    tracker: Arc<T>,
    nodes: NodeController<T>,
    generations: Mutex<GenerationCache>,
}

impl<T: ResourceTracker + ?Sized> Deployment<T> {
    pub fn new(
        context: DeployContext,
        spec: DeploymentSpec,
        tracker: Arc<T>,
        cloud: Cloud,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let spec = Arc::new(spec);
        let nodes = NodeController::new(
            tracker.clone(),
            cloud,
            probe,
            spec.clone(),
            context.timings.clone(),
        );
        Self {
            context,
            spec,
            tracker,
            nodes,
            generations: Mutex::new(GenerationCache::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.context.deployment_name
    }

    pub fn context(&self) -> &DeployContext {
        &self.context
    }

    pub fn spec(&self) -> &DeploymentSpec {
        &self.spec
    }

    pub fn tracker(&self) -> &Arc<T> {
        &self.tracker
    }

    pub fn nodes(&self) -> &NodeController<T> {
        &self.nodes
    }

    pub fn uses_database(&self) -> bool {
        !self.spec.database.is_empty()
    }

    fn cached_active(&self) -> Option<GenerationId> {
        self.generations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
    }

    pub(crate) fn set_active_generation(&self, generation_id: GenerationId) {
        self.generations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active = Some(generation_id);
    }

    /// Generation every active-flagged record agrees on. Records disagreeing
    /// is a consistency error.
    pub async fn active_generation_id(&self) -> Result<Option<GenerationId>> {
        if let Some(active) = self.cached_active() {
            return Ok(Some(active));
        }

        let active_nodes = self
            .tracker
            .find(self.name(), &NodeFilter::new().active(true))
            .await?;
        let Some(first) = active_nodes.first() else {
            return Ok(None);
        };

        if let Some(other) = active_nodes
            .iter()
            .find(|n| n.generation_id != first.generation_id)
        {
            return Err(DeployError::ConflictingActiveGenerations {
                deployment: self.name().to_string(),
                first: first.label(),
                first_generation: first.generation_id,
                second: other.label(),
                second_generation: other.generation_id,
            });
        }

        self.set_active_generation(first.generation_id);
        Ok(Some(first.generation_id))
    }

    pub async fn pending_generation_id(&self) -> Result<GenerationId> {
        Ok(self.active_generation_id().await?.map_or(1, |active| active + 1))
    }

    pub async fn generation_label(&self, generation_id: GenerationId) -> Result<Generation> {
        if self.active_generation_id().await? == Some(generation_id) {
            Ok(Generation::Active)
        } else if self.pending_generation_id().await? == generation_id {
            Ok(Generation::Pending)
        } else {
            Ok(Generation::Old)
        }
    }

    /// The running node for a role in a generation, if any.
    pub async fn get_node(
        &self,
        resource_type: ResourceType,
        name: &str,
        generation_id: GenerationId,
        is_running: bool,
    ) -> Result<Option<Node>> {
        let filter = NodeFilter::new()
            .generation(generation_id)
            .resource_type(resource_type)
            .name(name)
            .running(is_running);
        let mut matching = self.tracker.find(self.name(), &filter).await?;

        if matching.len() > 1 {
            return Err(DeployError::DuplicateNode {
                resource_type,
                name: name.to_string(),
                generation_id,
            });
        }
        Ok(matching.pop())
    }

    pub async fn get_active_node(
        &self,
        resource_type: ResourceType,
        name: &str,
    ) -> Result<Option<Node>> {
        match self.active_generation_id().await? {
            Some(active) => self.get_node(resource_type, name, active, true).await,
            None => Ok(None),
        }
    }

    pub async fn get_pending_node(
        &self,
        resource_type: ResourceType,
        name: &str,
    ) -> Result<Option<Node>> {
        let pending = self.pending_generation_id().await?;
        self.get_node(resource_type, name, pending, true).await
    }

    /// Records with a configuration entry. Running records for roles that are
    /// no longer configured are logged and left out.
    pub async fn get_all_nodes(
        &self,
        generation_id: Option<GenerationId>,
        is_running: Option<bool>,
    ) -> Result<Vec<Node>> {
        let filter = NodeFilter {
            generation_id,
            is_running,
            ..NodeFilter::default()
        };
        let matching = self.tracker.find(self.name(), &filter).await?;

        let mut configured = Vec::with_capacity(matching.len());
        for node in matching {
            if self.spec.config_for(node.resource_type, &node.name).is_some() {
                configured.push(node);
            } else if node.is_running {
                log::warn!(
                    "No configuration exists in the <{}> deployment for the <{}> node named <{}>",
                    self.name(),
                    node.resource_type,
                    node.name
                );
                log::info!(
                    "Available configurations: {:?}",
                    self.spec.role_names(node.resource_type)
                );
            }
        }
        Ok(configured)
    }

    pub async fn get_all_active_nodes(&self, is_running: Option<bool>) -> Result<Vec<Node>> {
        match self.active_generation_id().await? {
            Some(active) => self.get_all_nodes(Some(active), is_running).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_all_pending_nodes(&self, is_running: Option<bool>) -> Result<Vec<Node>> {
        let pending = self.pending_generation_id().await?;
        self.get_all_nodes(Some(pending), is_running).await
    }

    /// Nodes from generations that are neither active nor pending, oldest first.
    pub async fn get_all_old_nodes(&self, is_running: Option<bool>) -> Result<Vec<Node>> {
        let active = self.active_generation_id().await?;
        let pending = self.pending_generation_id().await?;

        let mut old: Vec<Node> = self
            .get_all_nodes(None, is_running)
            .await?
            .into_iter()
            .filter(|n| Some(n.generation_id) != active && n.generation_id != pending)
            .collect();
        old.sort_by_key(|n| n.generation_id);
        Ok(old)
    }

    async fn verify_running_state(&self, nodes: Vec<Node>) -> Result<Vec<Node>> {
        let mut reconciled = Vec::new();
        for node in nodes {
            let verified = self.nodes.verify_running_state(&node).await?;
            if verified.is_running != node.is_running {
                reconciled.push(verified);
            }
        }
        Ok(reconciled)
    }

    /// Reconcile records against the provider: pending, then active, then
    /// (optionally) old generations. Returns the records that were flipped.
    pub async fn verify_deployment_state(&self, verify_old: bool) -> Result<Vec<Node>> {
        let mut reconciled = self
            .verify_running_state(self.get_all_pending_nodes(None).await?)
            .await?;
        reconciled.extend(
            self.verify_running_state(self.get_all_active_nodes(None).await?)
                .await?,
        );
        if verify_old {
            reconciled.extend(
                self.verify_running_state(self.get_all_old_nodes(None).await?)
                    .await?,
            );
        }

        if !reconciled.is_empty() {
            log::info!(
                "Reconciled {} record(s) no longer backed by a running resource",
                reconciled.len()
            );
        }
        Ok(reconciled)
    }

    /// Whether another operational node of the same type in the same
    /// generation can carry the load while `node` is out of service.
    pub async fn has_required_redundancy(&self, node: &Node) -> Result<bool> {
        let peers = self
            .get_all_nodes(Some(node.generation_id), Some(true))
            .await?;

        for peer in peers
            .iter()
            .filter(|p| p.resource_type == node.resource_type && p.id != node.id)
        {
            if self.nodes.is_operational(peer).await {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn entries_failing<F, Fut>(
        &self,
        generation: Generation,
        mut check: F,
    ) -> Result<Vec<FleetEntry>>
    where
        F: FnMut(Node) -> Fut,
        Fut: std::future::Future<Output = Option<Node>>,
    {
        let mut failing = Vec::new();

        for (resource_type, name, _) in self.spec.roles() {
            let node = match generation {
                Generation::Active => self.get_active_node(resource_type, name).await?,
                Generation::Pending => self.get_pending_node(resource_type, name).await?,
                Generation::Old => None,
            };
            match node {
                None => {
                    log::info!("Missing node: {}-{}", resource_type, name);
                    failing.push(FleetEntry::Missing {
                        resource_type,
                        name: name.to_string(),
                    });
                }
                Some(node) => {
                    if let Some(node) = check(node).await {
                        failing.push(FleetEntry::Tracked(node));
                    }
                }
            }
        }
        Ok(failing)
    }

    /// Configured active roles that are missing or not operational.
    pub async fn get_inoperational_active_nodes(&self) -> Result<Vec<FleetEntry>> {
        self.entries_failing(Generation::Active, |node| async move {
            (!self.nodes.is_operational(&node).await).then_some(node)
        })
        .await
    }

    /// Configured active roles that are missing or unhealthy.
    pub async fn get_unhealthy_active_nodes(&self) -> Result<Vec<FleetEntry>> {
        self.entries_failing(Generation::Active, |node| async move {
            if self.nodes.is_healthy(&node).await {
                None
            } else {
                log::info!("Node unhealthy: {}", node);
                Some(node)
            }
        })
        .await
    }

    /// Configured pending roles that are missing or unhealthy.
    pub async fn get_unhealthy_pending_nodes(&self) -> Result<Vec<FleetEntry>> {
        self.entries_failing(Generation::Pending, |node| async move {
            if self.nodes.is_healthy(&node).await {
                None
            } else {
                log::info!("Node unhealthy: {}", node);
                Some(node)
            }
        })
        .await
    }

    pub async fn active_is_fully_operational(&self) -> Result<bool> {
        Ok(self.get_inoperational_active_nodes().await?.is_empty())
    }

    pub async fn active_is_healthy(&self) -> Result<bool> {
        Ok(self.get_unhealthy_active_nodes().await?.is_empty())
    }

    pub async fn pending_is_healthy(&self) -> Result<bool> {
        Ok(self.get_unhealthy_pending_nodes().await?.is_empty())
    }

    fn target_generation_error(target: Generation) -> DeployError {
        DeployError::InvalidOptions(format!(
            "nodes can only be registered to the ACTIVE or PENDING generation, not {}",
            target
        ))
    }

    /// Create or update the record for a provisioned resource filling
    /// `(resource_type, name)` in the target generation. With no active
    /// generation yet, an active registration lands in the pending id.
    pub async fn register_node(
        &self,
        resource_type: ResourceType,
        name: &str,
        resource_id: &str,
        target: Generation,
    ) -> Result<Node> {
        let (generation_id, is_active) = match target {
            Generation::Active => match self.active_generation_id().await? {
                Some(active) => (active, true),
                None => (self.pending_generation_id().await?, true),
            },
            Generation::Pending => (self.pending_generation_id().await?, false),
            Generation::Old => return Err(Self::target_generation_error(target)),
        };

        let mut existing = self
            .tracker
            .find(
                self.name(),
                &NodeFilter::new()
                    .resource_type(resource_type)
                    .resource_id(resource_id),
            )
            .await?;

        let mut node = match (existing.pop(), existing.is_empty()) {
            (Some(node), true) => node,
            _ => Node::new(
                self.name(),
                resource_type,
                resource_id,
                name,
                generation_id,
                is_active,
            ),
        };

        node.generation_id = generation_id;
        node.resource_type = resource_type;
        node.resource_id = resource_id.to_string();
        node.name = name.to_string();
        node.created_at = Utc::now();
        node.is_running = true;
        node.is_active_generation = is_active;

        let saved = self.tracker.save(&node).await?;
        if is_active {
            self.set_active_generation(generation_id);
        }
        Ok(saved)
    }

    /// Manually point a role at an existing resource. The resource must be
    /// known to the provider and actually running. The previous record for
    /// the role, if any, is retired first.
    pub async fn override_node(
        &self,
        resource_type: ResourceType,
        name: &str,
        resource_id: &str,
        target: Generation,
    ) -> Result<Node> {
        let (generation_id, is_active) = match target {
            Generation::Active => match self.active_generation_id().await? {
                Some(active) => (active, true),
                None => (self.pending_generation_id().await?, true),
            },
            Generation::Pending => (self.pending_generation_id().await?, false),
            Generation::Old => return Err(Self::target_generation_error(target)),
        };

        let mut candidate = Node::new(
            self.name(),
            resource_type,
            resource_id,
            name,
            generation_id,
            is_active,
        );
        if !self.nodes.is_actually_running(&candidate).await? {
            return Err(DeployError::Precondition(format!(
                "{} isn't actually running",
                resource_id
            )));
        }

        if let Some(previous) = self
            .get_node(resource_type, name, generation_id, true)
            .await?
        {
            if previous.resource_id == resource_id {
                candidate = previous;
            } else {
                log::info!("Replacing {} with {}", previous, resource_id);
                let mut replaced = previous;
                replaced.is_running = false;
                self.tracker.save(&replaced).await?;
            }
        }

        if let Some(launched_at) = self.nodes.launch_time(&candidate).await {
            candidate.created_at = launched_at;
        }
        candidate.is_running = true;
        candidate.is_active_generation = is_active;
        candidate.initial_deploy_complete = true;

        let saved = self.tracker.save(&candidate).await?;
        if is_active {
            self.set_active_generation(generation_id);
        }
        log::info!("Node {} altered", saved);
        Ok(saved)
    }
}
