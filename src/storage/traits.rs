use async_trait::async_trait;

use crate::error::Result;
use crate::types::{GenerationId, Node, ResourceType};

/// Field filters for [`ResourceTracker::find`]. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub generation_id: Option<GenerationId>,
    pub resource_type: Option<ResourceType>,
    pub name: Option<String>,
    pub resource_id: Option<String>,
    pub is_running: Option<bool>,
    pub is_active_generation: Option<bool>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(mut self, generation_id: GenerationId) -> Self {
        self.generation_id = Some(generation_id);
        self
    }

    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn running(mut self, is_running: bool) -> Self {
        self.is_running = Some(is_running);
        self
    }

    pub fn active(mut self, is_active_generation: bool) -> Self {
        self.is_active_generation = Some(is_active_generation);
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        self.generation_id.map_or(true, |g| node.generation_id == g)
            && self.resource_type.map_or(true, |t| node.resource_type == t)
            && self.name.as_ref().map_or(true, |n| &node.name == n)
            && self
                .resource_id
                .as_ref()
                .map_or(true, |r| &node.resource_id == r)
            && self.is_running.map_or(true, |r| node.is_running == r)
            && self
                .is_active_generation
                .map_or(true, |a| node.is_active_generation == a)
    }
}

/// Durable store of node records; the only state shared between runs.
#[async_trait]
pub trait ResourceTracker: Send + Sync {
    async fn find(&self, deployment_name: &str, filter: &NodeFilter) -> Result<Vec<Node>>;

    /// Insert or overwrite `node`, provided the stored record still carries
    /// `node.version`. Returns the stored record with its bumped version.
    /// A stale version fails with `DeployError::ConcurrentModification`.
    async fn save(&self, node: &Node) -> Result<Node>;
}
