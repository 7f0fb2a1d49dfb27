use std::future::Future;

use crate::decision::{arbitrate, DecisionRequest, Escalation, Verdict};
use crate::engine::coordinator::Deployment;
use crate::error::{DeployError, Result};
use crate::storage::ResourceTracker;
use crate::types::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Operational,
    PendingRotation,
    TemporarilyInoperative,
    Restoring,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationEvent {
    /// Redundancy (or the lack of a need for it) has been settled.
    Cleared,
    TakenOutOfService,
    BodyFinished,
    Restored,
    RestoreAbandoned,
}

pub struct RotationStateMachine;

impl RotationStateMachine {
    pub fn transition(state: RotationState, event: RotationEvent) -> Result<RotationState> {
        let next = match (state, event) {
            (RotationState::Operational, RotationEvent::Cleared) => RotationState::PendingRotation,
            (RotationState::PendingRotation, RotationEvent::TakenOutOfService) => {
                RotationState::TemporarilyInoperative
            }
            (
                RotationState::PendingRotation | RotationState::TemporarilyInoperative,
                RotationEvent::BodyFinished,
            ) => RotationState::Restoring,
            (RotationState::Restoring, RotationEvent::Restored) => RotationState::Operational,
            (RotationState::Restoring, RotationEvent::RestoreAbandoned) => RotationState::Degraded,
            _ => {
                return Err(DeployError::Precondition(format!(
                    "invalid rotation transition from {:?} with event {:?}",
                    state, event
                )));
            }
        };
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RotationOptions {
    /// Refuse (or ask) before interrupting a node without a serving peer.
    pub force_seamless: bool,
    /// Restore the node even if it was not operational to begin with, and
    /// skip the health precondition when restoring.
    pub force_operational: bool,
}

#[derive(Debug)]
pub struct Rotation<R> {
    pub state: RotationState,
    pub value: R,
}

impl<R> Rotation<R> {
    pub fn is_degraded(&self) -> bool {
        self.state == RotationState::Degraded
    }
}

struct Rotor {
    state: RotationState,
}

impl Rotor {
    fn advance(&mut self, event: RotationEvent) -> Result<()> {
        self.state = RotationStateMachine::transition(self.state, event)?;
        Ok(())
    }
}

impl<T: ResourceTracker + ?Sized> Deployment<T> {
    /// Take `node` out of service, run `body`, and put it back.
    ///
    /// Redundancy is checked before anything is disrupted. Restoration runs
    /// whether or not `body` succeeds; a body error is returned after it.
    /// With no `node` (the body creates one), restoration repairs the whole
    /// active generation instead.
    pub async fn with_rotation<F, Fut, R>(
        &self,
        node: Option<&Node>,
        options: RotationOptions,
        body: F,
    ) -> Result<Rotation<R>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut rotor = Rotor {
            state: RotationState::Operational,
        };
        let mut restore = options.force_operational;

        let serving = match node {
            Some(node) => self.nodes().is_operational(node).await,
            None => false,
        };

        if let Some(node) = node.filter(|_| serving) {
            if options.force_seamless && !self.has_required_redundancy(node).await? {
                self.confirm_interruption(node)?;
            }
        }
        rotor.advance(RotationEvent::Cleared)?;

        if let Some(node) = node {
            if serving {
                restore = true;
                log::info!("Making temporarily inoperative: {}", node);
                self.nodes().make_temporarily_inoperative(node).await?;
                rotor.advance(RotationEvent::TakenOutOfService)?;
                log::info!("Node {} now inoperative", node);
            }
        }

        let outcome = body().await;
        rotor.advance(RotationEvent::BodyFinished)?;

        let restored = if restore {
            log::info!(
                "Restoring operation: {}",
                node.map_or_else(|| "active generation".to_string(), |n| n.to_string())
            );
            match node {
                Some(node) => self.restore_node(node, options.force_operational).await,
                None => self.restore_generation(options.force_operational).await,
            }
        } else {
            Ok(RotationEvent::Restored)
        };

        match (outcome, restored) {
            (Ok(value), Ok(event)) => {
                rotor.advance(event)?;
                Ok(Rotation {
                    state: rotor.state,
                    value,
                })
            }
            (Ok(_), Err(restore_err)) => Err(restore_err),
            (Err(body_err), Ok(_)) => Err(body_err),
            (Err(body_err), Err(restore_err)) => {
                log::error!("Restoration also failed: {}", restore_err);
                Err(body_err)
            }
        }
    }

    fn confirm_interruption(&self, node: &Node) -> Result<()> {
        if !self.context().interactive {
            log::error!("Not possible to avoid service interruption to node {}", node);
            log::error!("Deployment marked non-interactive. Aborting.");
            return Err(DeployError::InsufficientRedundancy(node.to_string()));
        }

        let request = DecisionRequest::InterruptService {
            node: node.to_string(),
        };
        match arbitrate(self.context().arbiter.as_ref(), &request) {
            Verdict::Proceed => {
                log::warn!("Interrupting service on {} at operator request", node);
                Ok(())
            }
            _ => {
                log::error!("Node {} doesn't have required redundancy. Aborting", node);
                Err(DeployError::InsufficientRedundancy(node.to_string()))
            }
        }
    }

    /// One bounded round of restore attempts with a fixed backoff.
    async fn restore_node_round(
        &self,
        node: &Node,
        force_operational: bool,
    ) -> Escalation<()> {
        let timings = &self.context().timings;
        let backoff = timings.restore_backoff();

        for attempt in 0..=timings.restore_retries {
            if attempt > 0 {
                log::info!("Still not operational. Trying again.");
            }
            if let Err(e) = self.nodes().make_operational(node, force_operational).await {
                log::warn!("Failed to make node {} operational: {}", node, e);
            }
            if self.nodes().is_operational(node).await {
                log::info!("Node {} now operational", node);
                return Escalation::Resolved(());
            }

            log::info!("Waiting {:?} for node to become operational", backoff);
            tokio::time::sleep(backoff).await;
            if self.nodes().is_operational(node).await {
                log::info!("Node {} now operational", node);
                return Escalation::Resolved(());
            }
        }

        let assessment = self.nodes().assess(node).await;
        log::info!("Node {} not operational.", node);
        log::info!(
            "Health check URL: {}",
            assessment
                .snapshot
                .health_check_url
                .as_deref()
                .unwrap_or("none")
        );
        Escalation::NeedsOperatorDecision(DecisionRequest::RestoreFailed {
            node: node.to_string(),
            health_check_url: assessment.snapshot.health_check_url,
        })
    }

    async fn restore_node(&self, node: &Node, force_operational: bool) -> Result<RotationEvent> {
        loop {
            match self.restore_node_round(node, force_operational).await {
                Escalation::Resolved(()) => return Ok(RotationEvent::Restored),
                Escalation::NeedsOperatorDecision(request) => {
                    match self.resolve(&request)? {
                        Some(event) => return Ok(event),
                        None => continue,
                    }
                }
            }
        }
    }

    async fn restore_generation_round(&self, force_operational: bool) -> Result<Escalation<()>> {
        self.repair_active_generation(force_operational, false)
            .await?;
        if self.active_is_fully_operational().await? {
            log::info!("Active generation is fully operational");
            return Ok(Escalation::Resolved(()));
        }
        Ok(Escalation::NeedsOperatorDecision(
            DecisionRequest::GenerationDegraded {
                deployment: self.name().to_string(),
            },
        ))
    }

    async fn restore_generation(&self, force_operational: bool) -> Result<RotationEvent> {
        loop {
            match self.restore_generation_round(force_operational).await? {
                Escalation::Resolved(()) => return Ok(RotationEvent::Restored),
                Escalation::NeedsOperatorDecision(request) => {
                    match self.resolve(&request)? {
                        Some(event) => return Ok(event),
                        None => continue,
                    }
                }
            }
        }
    }

    /// `None` means retry.
    fn resolve(&self, request: &DecisionRequest) -> Result<Option<RotationEvent>> {
        match arbitrate(self.context().arbiter.as_ref(), request) {
            Verdict::Retry => Ok(None),
            Verdict::Ignore => {
                log::warn!("Leaving degraded at operator request: {}", request);
                Ok(Some(RotationEvent::RestoreAbandoned))
            }
            Verdict::Proceed | Verdict::Fail => {
                log::error!("Aborting deployment: {}", request);
                Err(DeployError::OperatorAborted(request.to_string()))
            }
        }
    }
}
