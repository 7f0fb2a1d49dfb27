use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::{DeployError, Result};
use crate::storage::traits::{NodeFilter, ResourceTracker};
use crate::types::{Node, NodeId};

#[derive(Clone)]
pub struct InMemoryTracker {
    nodes: Arc<RwLock<HashMap<NodeId, Node>>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let tracker = Self::new();
        for node in nodes {
            tracker.seed(node);
        }
        tracker
    }

    /// Insert a record as-is, bypassing the version check.
    pub fn seed(&self, node: Node) {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.insert(node.id, node);
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        nodes.get(id).cloned()
    }

    pub fn all(&self) -> Vec<Node> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Node> = nodes.values().cloned().collect();
        all.sort_by(|a, b| {
            (a.generation_id, a.created_at, a.id).cmp(&(b.generation_id, b.created_at, b.id))
        });
        all
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let nodes: Vec<Node> = serde_json::from_str(&raw)?;
        Ok(Self::from_nodes(nodes))
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.all())?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

impl Default for InMemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceTracker for InMemoryTracker {
    async fn find(&self, deployment_name: &str, filter: &NodeFilter) -> Result<Vec<Node>> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Node> = nodes
            .values()
            .filter(|n| n.deployment_name == deployment_name && filter.matches(n))
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.generation_id, a.created_at).cmp(&(b.generation_id, b.created_at)));
        Ok(found)
    }

    async fn save(&self, node: &Node) -> Result<Node> {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let stored_version = nodes.get(&node.id).map(|n| n.version).unwrap_or(0);
        if stored_version != node.version {
            return Err(DeployError::ConcurrentModification(node.id));
        }

        let mut saved = node.clone();
        saved.version = node.version + 1;
        nodes.insert(saved.id, saved.clone());
        Ok(saved)
    }
}
