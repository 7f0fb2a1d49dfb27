use std::sync::Arc;

use crate::config::{Credentials, Timings};
use crate::decision::{Arbiter, NonInteractive};

/// Everything a run needs that is not node state: who we are acting as,
/// which environment, whether a human is watching, and how long to wait.
#[derive(Clone)]
pub struct DeployContext {
    pub deployment_name: String,
    pub credentials: Credentials,
    pub interactive: bool,
    pub timings: Timings,
    pub arbiter: Arc<dyn Arbiter>,
}

impl DeployContext {
    pub fn new(deployment_name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            deployment_name: deployment_name.into(),
            credentials,
            interactive: false,
            timings: Timings::default(),
            arbiter: Arc::new(NonInteractive),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn interactive(mut self, arbiter: Arc<dyn Arbiter>) -> Self {
        self.interactive = true;
        self.arbiter = arbiter;
        self
    }

    pub fn with_arbiter(mut self, arbiter: Arc<dyn Arbiter>) -> Self {
        self.arbiter = arbiter;
        self
    }
}

impl std::fmt::Debug for DeployContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployContext")
            .field("deployment_name", &self.deployment_name)
            .field("interactive", &self.interactive)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}
