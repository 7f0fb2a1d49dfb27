#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use genroll::cloud::{Cloud, HealthProbe, InMemoryCloud};
use genroll::config::{CloudConfig, Credentials, DeploymentSpec, NodeConfig, Timings};
use genroll::decision::Arbiter;
use genroll::storage::InMemoryTracker;
use genroll::types::{BalancerMembership, DbStatus, GenerationId, InstanceState, Node, ResourceType};
use genroll::{DeployContext, Deployment};

pub const DEPLOYMENT: &str = "production";
pub const KEYPAIR: &str = "deploy-2024";
pub const BALANCER: &str = "lb-web";
pub const ADDRESS: &str = "203.0.113.10";

/// Probe answering from a table of URLs, `default` for anything else.
pub struct StubProbe {
    default: bool,
    answers: Mutex<HashMap<String, bool>>,
    seen: Mutex<Vec<String>>,
}

impl StubProbe {
    pub fn new(default: bool) -> Self {
        Self {
            default,
            answers: Mutex::new(HashMap::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn answer(&self, url: &str, healthy: bool) {
        self.answers.lock().unwrap().insert(url.to_string(), healthy);
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProbe for StubProbe {
    async fn probe(&self, url: &str, _timeout: Duration, _marker: &str) -> bool {
        self.seen.lock().unwrap().push(url.to_string());
        self.answers
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(self.default)
    }
}

pub fn fast_timings() -> Timings {
    Timings {
        repair_poll_interval_ms: 2,
        repair_timeout_ms: 20,
        restore_retries: 2,
        restore_backoff_ms: 1,
        address_poll_interval_ms: 1,
        address_timeout_ms: 10,
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        access_key_id: "AKIATEST".to_string(),
        secret_access_key: "secret".to_string(),
    }
}

pub fn create_test_node_config() -> NodeConfig {
    NodeConfig {
        cloud: CloudConfig {
            access_key_id: Some("AKIATEST".to_string()),
            secret_access_key: Some("secret".to_string()),
            keypair: Some(KEYPAIR.to_string()),
            elastic_ip: None,
        },
        loadbalancer: Some(BALANCER.to_string()),
        health_check: None,
        final_snapshot: None,
    }
}

/// Two balanced compute roles, `web1` and `web2`.
pub fn create_test_spec() -> DeploymentSpec {
    let mut spec = DeploymentSpec::default();
    spec.compute
        .insert("web1".to_string(), create_test_node_config());
    spec.compute
        .insert("web2".to_string(), create_test_node_config());
    spec
}

/// Like `create_test_spec`, with `web1` also holding the static address.
pub fn create_addressed_spec() -> DeploymentSpec {
    let mut spec = create_test_spec();
    if let Some(web1) = spec.compute.get_mut("web1") {
        web1.cloud.elastic_ip = Some(ADDRESS.to_string());
    }
    spec
}

#[derive(Clone)]
pub struct Harness {
    pub tracker: Arc<InMemoryTracker>,
    pub cloud: Arc<InMemoryCloud>,
    pub probe: Arc<StubProbe>,
    pub spec: DeploymentSpec,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_spec(create_test_spec())
    }

    pub fn with_spec(spec: DeploymentSpec) -> Self {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_balancer(BALANCER);
        Self {
            tracker: Arc::new(InMemoryTracker::new()),
            cloud,
            probe: Arc::new(StubProbe::new(true)),
            spec,
        }
    }

    fn context(&self) -> DeployContext {
        DeployContext::new(DEPLOYMENT, credentials()).with_timings(fast_timings())
    }

    fn build(&self, context: DeployContext) -> Deployment<InMemoryTracker> {
        Deployment::new(
            context,
            self.spec.clone(),
            self.tracker.clone(),
            Cloud::uniform(self.cloud.clone()),
            self.probe.clone(),
        )
    }

    /// Non-interactive view of the deployment.
    pub fn deployment(&self) -> Deployment<InMemoryTracker> {
        self.build(self.context())
    }

    pub fn interactive(&self, arbiter: Arc<dyn Arbiter>) -> Deployment<InMemoryTracker> {
        self.build(self.context().interactive(arbiter))
    }

    /// Track a running compute node backed by a running instance with the
    /// configured keypair. It is not placed in the balancer.
    pub fn seed_compute(
        &self,
        name: &str,
        resource_id: &str,
        generation_id: GenerationId,
        active: bool,
    ) -> Node {
        self.cloud
            .add_compute(resource_id, InstanceState::Running, KEYPAIR);
        self.track(ResourceType::Compute, name, resource_id, generation_id, active)
    }

    /// Like `seed_compute`, and in service in the balancer.
    pub fn seed_serving(
        &self,
        name: &str,
        resource_id: &str,
        generation_id: GenerationId,
        active: bool,
    ) -> Node {
        let node = self.seed_compute(name, resource_id, generation_id, active);
        self.serve(resource_id);
        node
    }

    pub fn seed_database(
        &self,
        name: &str,
        resource_id: &str,
        generation_id: GenerationId,
        active: bool,
    ) -> Node {
        self.cloud.add_database(resource_id, DbStatus::Available);
        self.track(ResourceType::Database, name, resource_id, generation_id, active)
    }

    /// Record only; the provider knows nothing about it.
    pub fn track(
        &self,
        resource_type: ResourceType,
        name: &str,
        resource_id: &str,
        generation_id: GenerationId,
        active: bool,
    ) -> Node {
        let node = Node::new(
            DEPLOYMENT,
            resource_type,
            resource_id,
            name,
            generation_id,
            active,
        );
        self.tracker.seed(node.clone());
        node
    }

    pub fn serve(&self, resource_id: &str) {
        self.cloud
            .set_member_health(BALANCER, resource_id, BalancerMembership::IN_SERVICE);
    }

    pub fn in_balancer(&self, resource_id: &str) -> bool {
        self.cloud
            .inventory()
            .balancers
            .get(BALANCER)
            .map(|members| members.contains_key(resource_id))
            .unwrap_or(false)
    }

    /// Resource the static address points at.
    pub fn address_holder(&self) -> Option<String> {
        self.cloud
            .inventory()
            .addresses
            .get(ADDRESS)
            .cloned()
            .flatten()
    }

    pub fn stored(&self, node: &Node) -> Node {
        self.tracker.get(&node.id).expect("node is tracked")
    }
}
