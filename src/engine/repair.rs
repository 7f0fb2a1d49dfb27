use std::time::Duration;

use crate::engine::coordinator::{Deployment, FleetEntry};
use crate::error::{DeployError, Result};
use crate::storage::ResourceTracker;
use crate::types::{Generation, Node};

impl<T: ResourceTracker + ?Sized> Deployment<T> {
    /// Bring every healthy (or, when forced, every) non-operational active
    /// node into operation. Returns the nodes acted on, including those whose
    /// provider calls failed; a failure on one node does not stop the others.
    ///
    /// With `wait_until_operational`, polls until all of them report
    /// operational and fails with `WaitTimedOut` past the repair budget.
    pub async fn repair_active_generation(
        &self,
        force_operational: bool,
        wait_until_operational: bool,
    ) -> Result<Vec<Node>> {
        if self.active_is_fully_operational().await? {
            log::info!("All active nodes are operational");
            return Ok(Vec::new());
        }

        let mut made_operational = Vec::new();
        for entry in self.get_inoperational_active_nodes().await? {
            let node = match entry {
                FleetEntry::Tracked(node) => node,
                missing @ FleetEntry::Missing { .. } => {
                    log::warn!("Node missing: {}", missing.label());
                    continue;
                }
            };

            let assessment = self.nodes().assess(&node).await;
            if assessment.operational {
                log::debug!("Node operational: {}", node);
                continue;
            }
            if assessment.healthy || force_operational {
                log::info!("Making node operational: {}", node);
                if let Err(e) = self
                    .nodes()
                    .make_operational(&node, force_operational)
                    .await
                {
                    log::warn!("Failed to make node {} operational: {}", node, e);
                }
                made_operational.push(node);
            } else {
                log::warn!("Node unhealthy: {}", node);
            }
        }

        if made_operational.is_empty() {
            log::info!("No healthy non-operational nodes available");
            return Ok(made_operational);
        }
        if !wait_until_operational {
            return Ok(made_operational);
        }

        log::info!("Waiting until all nodes are actually operational");
        self.wait_until_operational(&made_operational).await?;
        Ok(made_operational)
    }

    async fn wait_until_operational(&self, nodes: &[Node]) -> Result<()> {
        let timings = &self.context().timings;
        let interval = timings.repair_poll_interval();
        let mut waiting: Vec<&Node> = nodes.iter().collect();
        let mut waited = Duration::ZERO;

        loop {
            let mut still_waiting = Vec::with_capacity(waiting.len());
            for node in waiting {
                if !self.nodes().is_operational(node).await {
                    still_waiting.push(node);
                }
            }
            waiting = still_waiting;

            if waiting.is_empty() {
                return Ok(());
            }
            if waited >= timings.repair_timeout() {
                return Err(DeployError::WaitTimedOut {
                    pending: waiting.iter().map(|n| n.label()).collect(),
                });
            }

            log::info!(
                "{} node(s) still not operational. Waiting {:?}",
                waiting.len(),
                interval
            );
            tokio::time::sleep(interval).await;
            waited += interval;
        }
    }

    /// Promote the pending generation to active and move traffic onto it.
    ///
    /// Every active record is flipped off before any pending record is
    /// flipped on; each write is version-checked, so a concurrent run
    /// touching the same records aborts this one with
    /// `ConcurrentModification`. Returns the newly active nodes.
    pub async fn increment_generation(&self) -> Result<Vec<Node>> {
        let unhealthy = self.get_unhealthy_pending_nodes().await?;
        if !unhealthy.is_empty() {
            let labels: Vec<String> = unhealthy.iter().map(FleetEntry::label).collect();
            return Err(DeployError::Precondition(format!(
                "pending generation must be fully healthy to increment (unhealthy: {})",
                labels.join(", ")
            )));
        }

        let pending_id = self.pending_generation_id().await?;
        let active_nodes = self.get_all_active_nodes(None).await?;
        let pending_nodes = self.get_all_pending_nodes(None).await?;

        for node in active_nodes {
            let mut demoted = node;
            demoted.is_active_generation = false;
            self.tracker().save(&demoted).await?;
        }

        let mut promoted = Vec::with_capacity(pending_nodes.len());
        for node in pending_nodes {
            let mut node = node;
            node.is_active_generation = true;
            promoted.push(self.tracker().save(&node).await?);
        }
        self.set_active_generation(pending_id);

        log::info!("Generation {} is now active", pending_id);
        log::info!("Making nodes operational");
        self.repair_active_generation(false, true).await?;
        log::warn!(
            "Previously-active generation may still hold resources. Use `terminate` to remove it"
        );

        Ok(promoted)
    }

    /// Take every running node of a pending or old generation out of service.
    /// Hard termination also releases the resources; soft leaves them up.
    pub async fn terminate_generation(&self, target: Generation, hard: bool) -> Result<Vec<Node>> {
        let candidates = match target {
            Generation::Active => {
                return Err(DeployError::Precondition(
                    "can't terminate the active generation".to_string(),
                ))
            }
            Generation::Pending => self.get_all_pending_nodes(Some(true)).await?,
            Generation::Old => self.get_all_old_nodes(Some(true)).await?,
        };

        let mut running = Vec::new();
        for node in candidates {
            let verified = self.nodes().verify_running_state(&node).await?;
            if verified.is_running {
                running.push(verified);
            }
        }

        if running.is_empty() {
            log::info!("No running nodes exist for generation: {}", target);
            return Ok(running);
        }

        let mut affected = Vec::with_capacity(running.len());
        for node in running {
            log::info!(
                "{} terminating: {}",
                if hard { "HARD" } else { "SOFT" },
                node
            );
            self.nodes().make_fully_inoperative(&node).await?;
            if hard {
                affected.push(self.nodes().terminate(&node).await?);
            } else {
                affected.push(node);
            }
        }
        Ok(affected)
    }
}
