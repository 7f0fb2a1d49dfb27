use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{GenerationId, NodeId, ResourceType};

/// Tracking record for one cloud resource belonging to a deployment.
///
/// `version` is bumped by the tracker on every successful save and is used
/// as the compare-and-swap token for the next write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub deployment_name: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub name: String,
    pub generation_id: GenerationId,
    pub is_running: bool,
    pub is_active_generation: bool,
    pub initial_deploy_complete: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Node {
    pub fn new(
        deployment_name: impl Into<String>,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        name: impl Into<String>,
        generation_id: GenerationId,
        is_active_generation: bool,
    ) -> Self {
        Self {
            id: NodeId::new_v4(),
            deployment_name: deployment_name.into(),
            resource_type,
            resource_id: resource_id.into(),
            name: name.into(),
            generation_id,
            is_running: true,
            is_active_generation,
            initial_deploy_complete: false,
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Short `type:name[resource]` label used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}:{}[{}]", self.resource_type, self.name, self.resource_id)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}[{}]<{}>",
            self.resource_type,
            self.name,
            self.resource_id,
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
