use thiserror::Error;

use crate::types::{GenerationId, NodeId, ResourceType};

pub type Result<T> = std::result::Result<T, DeployError>;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(
        "inconsistent generation ids in deployment {deployment}: \
         {first} (generation {first_generation}) and {second} (generation {second_generation}) \
         both marked active"
    )]
    ConflictingActiveGenerations {
        deployment: String,
        first: String,
        first_generation: GenerationId,
        second: String,
        second_generation: GenerationId,
    },

    #[error("more than one running {resource_type} node named {name} in generation {generation_id}")]
    DuplicateNode {
        resource_type: ResourceType,
        name: String,
        generation_id: GenerationId,
    },

    #[error("node record {0} was modified concurrently")]
    ConcurrentModification(NodeId),

    #[error("timed out waiting on nodes: {}", .pending.join(", "))]
    WaitTimedOut { pending: Vec<String> },

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("not possible to avoid service interruption to node {0}")]
    InsufficientRedundancy(String),

    #[error("aborted: {0}")]
    OperatorAborted(String),

    #[error("{resource_type} role {name} has no '{key}' credential")]
    MissingCredentials {
        resource_type: ResourceType,
        name: String,
        key: &'static str,
    },

    #[error("{resource_type} role {name} has a '{key}' credential different from other roles")]
    NonUniformCredentials {
        resource_type: ResourceType,
        name: String,
        key: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid command options: {0}")]
    InvalidOptions(String),

    #[error("storage backend error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl DeployError {
    /// Process exit status for a fatal run.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::InvalidOptions(_) => 2,
            _ => 1,
        }
    }

    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            DeployError::ConflictingActiveGenerations { .. }
                | DeployError::DuplicateNode { .. }
                | DeployError::ConcurrentModification(_)
        )
    }
}
