use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// GET `url` and report whether the body contains `marker`.
    /// Connection failures and timeouts count as unhealthy.
    async fn probe(&self, url: &str, timeout: Duration, marker: &str) -> bool;
}

pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("genroll/1.0")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str, timeout: Duration, marker: &str) -> bool {
        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                log::info!("health_check timed out for {}", url);
                return false;
            }
            Err(e) if e.is_connect() => {
                log::info!("health_check unavailable for {}", url);
                return false;
            }
            Err(e) => {
                log::info!("health_check raised exception for {}: {}", url, e);
                return false;
            }
        };

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                log::info!("health_check body unreadable for {}: {}", url, e);
                return false;
            }
        };

        if !body.contains(marker) {
            log::debug!("Required string {:?} not present in health_check for {}", marker, url);
            return false;
        }

        true
    }
}
