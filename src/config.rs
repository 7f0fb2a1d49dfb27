use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{DeployError, Result};
use crate::types::ResourceType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub deployments: BTreeMap<String, DeploymentSpec>,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub non_interactive: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file, then overlay the environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("toml");

        let mut config: Config = match extension {
            "yaml" | "yml" => serde_yaml::from_str(&raw)
                .map_err(|e| DeployError::Config(format!("{}: {}", path.display(), e)))?,
            _ => toml::from_str(&raw)
                .map_err(|e| DeployError::Config(format!("{}: {}", path.display(), e)))?,
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(flag) = std::env::var("GENROLL_NONINTERACTIVE") {
            self.non_interactive = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    /// Pick the target deployment. Ambiguity is an invalid-options error.
    pub fn select_deployment(&self, name: Option<&str>) -> Result<(&str, &DeploymentSpec)> {
        match name {
            Some(name) => self
                .deployments
                .get_key_value(name)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| {
                    DeployError::InvalidOptions(format!("unknown environment '{}'", name))
                }),
            None => {
                let mut iter = self.deployments.iter();
                match (iter.next(), iter.next()) {
                    (Some((k, v)), None) => Ok((k.as_str(), v)),
                    (None, _) => Err(DeployError::InvalidOptions(
                        "no environments configured".to_string(),
                    )),
                    _ => Err(DeployError::InvalidOptions(format!(
                        "more than one environment configured ({}); pick one with --environment",
                        self.deployments.keys().cloned().collect::<Vec<_>>().join(", ")
                    ))),
                }
            }
        }
    }
}

/// Desired roles of one deployment: `(resource type, name) -> configuration`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub compute: BTreeMap<String, NodeConfig>,
    #[serde(default)]
    pub database: BTreeMap<String, NodeConfig>,
}

impl DeploymentSpec {
    pub fn config_for(&self, resource_type: ResourceType, name: &str) -> Option<&NodeConfig> {
        self.roles_of(resource_type).and_then(|roles| roles.get(name))
    }

    pub fn roles_of(&self, resource_type: ResourceType) -> Option<&BTreeMap<String, NodeConfig>> {
        match resource_type {
            ResourceType::Compute => Some(&self.compute),
            ResourceType::Database => Some(&self.database),
            ResourceType::LoadBalancer => None,
        }
    }

    /// Every configured `(type, name)` role, compute first.
    pub fn roles(&self) -> impl Iterator<Item = (ResourceType, &str, &NodeConfig)> {
        self.compute
            .iter()
            .map(|(name, conf)| (ResourceType::Compute, name.as_str(), conf))
            .chain(
                self.database
                    .iter()
                    .map(|(name, conf)| (ResourceType::Database, name.as_str(), conf)),
            )
    }

    pub fn role_names(&self, resource_type: ResourceType) -> Vec<String> {
        self.roles_of(resource_type)
            .map(|roles| roles.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// All roles must carry the same, complete pair of cloud credentials.
    pub fn credentials(&self) -> Result<Credentials> {
        let mut found: Option<Credentials> = None;

        for (resource_type, name, conf) in self.roles() {
            let access_key_id = conf.cloud.access_key_id.clone().ok_or_else(|| {
                DeployError::MissingCredentials {
                    resource_type,
                    name: name.to_string(),
                    key: "access_key_id",
                }
            })?;
            let secret_access_key = conf.cloud.secret_access_key.clone().ok_or_else(|| {
                DeployError::MissingCredentials {
                    resource_type,
                    name: name.to_string(),
                    key: "secret_access_key",
                }
            })?;

            match &found {
                Some(seen) => {
                    if seen.access_key_id != access_key_id {
                        return Err(DeployError::NonUniformCredentials {
                            resource_type,
                            name: name.to_string(),
                            key: "access_key_id",
                        });
                    }
                    if seen.secret_access_key != secret_access_key {
                        return Err(DeployError::NonUniformCredentials {
                            resource_type,
                            name: name.to_string(),
                            key: "secret_access_key",
                        });
                    }
                }
                None => {
                    found = Some(Credentials {
                        access_key_id,
                        secret_access_key,
                    })
                }
            }
        }

        Ok(found.unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub loadbalancer: Option<String>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(default)]
    pub final_snapshot: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub keypair: Option<String>,
    pub elastic_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub status_url: String,
    pub status_contains: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl HealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Poll and retry budgets, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub repair_poll_interval_ms: u64,
    pub repair_timeout_ms: u64,
    pub restore_retries: u32,
    pub restore_backoff_ms: u64,
    pub address_poll_interval_ms: u64,
    pub address_timeout_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            repair_poll_interval_ms: 10_000,
            repair_timeout_ms: 240_000,
            restore_retries: 10,
            restore_backoff_ms: 1_000,
            address_poll_interval_ms: 5_000,
            address_timeout_ms: 120_000,
        }
    }
}

impl Timings {
    pub fn repair_poll_interval(&self) -> Duration {
        Duration::from_millis(self.repair_poll_interval_ms)
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_millis(self.repair_timeout_ms)
    }

    pub fn restore_backoff(&self) -> Duration {
        Duration::from_millis(self.restore_backoff_ms)
    }

    pub fn address_poll_interval(&self) -> Duration {
        Duration::from_millis(self.address_poll_interval_ms)
    }

    pub fn address_timeout(&self) -> Duration {
        Duration::from_millis(self.address_timeout_ms)
    }
}
