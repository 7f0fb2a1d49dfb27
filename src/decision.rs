use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// An operator's answer to a [`DecisionRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Ignore,
    Retry,
    Fail,
}

impl Verdict {
    pub fn key(&self) -> &str {
        match self {
            Verdict::Proceed => "Y",
            Verdict::Ignore => "I",
            Verdict::Retry => "R",
            Verdict::Fail => "F",
        }
    }
}

/// A situation the core cannot settle on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionRequest {
    /// Pulling the node out of service would interrupt it.
    InterruptService { node: String },
    /// The node could not be restored to operation.
    RestoreFailed {
        node: String,
        health_check_url: Option<String>,
    },
    /// The active generation could not be brought back to full operation.
    GenerationDegraded { deployment: String },
}

impl DecisionRequest {
    pub fn options(&self) -> &'static [Verdict] {
        match self {
            DecisionRequest::InterruptService { .. } => &[Verdict::Proceed, Verdict::Fail],
            DecisionRequest::RestoreFailed { .. } | DecisionRequest::GenerationDegraded { .. } => {
                &[Verdict::Ignore, Verdict::Retry, Verdict::Fail]
            }
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            DecisionRequest::InterruptService { node } => format!(
                "Not possible to avoid service interruption to node {}. Continue anyway? (Y/F)",
                node
            ),
            DecisionRequest::RestoreFailed { node, .. } => format!(
                "Node {} not made operational. Ignore/Retry/Fail (I/R/F)?",
                node
            ),
            DecisionRequest::GenerationDegraded { deployment } => format!(
                "Active generation of {} not fully operational. Ignore/Retry/Fail (I/R/F)?",
                deployment
            ),
        }
    }
}

impl fmt::Display for DecisionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prompt())
    }
}

/// Outcome of a core step that may need an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation<T> {
    Resolved(T),
    NeedsOperatorDecision(DecisionRequest),
}

/// Answers decision requests on behalf of an operator.
pub trait Arbiter: Send + Sync {
    fn decide(&self, request: &DecisionRequest) -> Verdict;
}

/// Resolve a request, treating any verdict outside its options as `Fail`.
pub fn arbitrate(arbiter: &dyn Arbiter, request: &DecisionRequest) -> Verdict {
    let verdict = arbiter.decide(request);
    if request.options().contains(&verdict) {
        verdict
    } else {
        log::warn!("Verdict {:?} is not valid for: {}", verdict, request);
        Verdict::Fail
    }
}

/// Arbiter for unattended runs: never risks an outage, always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl Arbiter for NonInteractive {
    fn decide(&self, request: &DecisionRequest) -> Verdict {
        log::error!("Non-interactive run cannot resolve: {}", request);
        Verdict::Fail
    }
}

/// Replays a fixed list of verdicts, then fails. Records every request seen.
#[derive(Debug, Default)]
pub struct Scripted {
    verdicts: Mutex<VecDeque<Verdict>>,
    seen: Mutex<Vec<DecisionRequest>>,
}

impl Scripted {
    pub fn new(verdicts: impl IntoIterator<Item = Verdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Arbiter for Scripted {
    fn decide(&self, request: &DecisionRequest) -> Verdict {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.verdicts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Verdict::Fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_verdict_fails() {
        let arbiter = Scripted::new([Verdict::Retry]);
        let request = DecisionRequest::InterruptService {
            node: "compute:web[i-1]".to_string(),
        };
        assert_eq!(arbitrate(&arbiter, &request), Verdict::Fail);
    }

    #[test]
    fn test_scripted_exhausts_to_fail() {
        let arbiter = Scripted::new([Verdict::Ignore]);
        let request = DecisionRequest::GenerationDegraded {
            deployment: "staging".to_string(),
        };
        assert_eq!(arbitrate(&arbiter, &request), Verdict::Ignore);
        assert_eq!(arbitrate(&arbiter, &request), Verdict::Fail);
        assert_eq!(arbiter.requests().len(), 2);
    }

    #[test]
    fn test_non_interactive_always_fails() {
        let request = DecisionRequest::RestoreFailed {
            node: "compute:web[i-1]".to_string(),
            health_check_url: None,
        };
        assert_eq!(arbitrate(&NonInteractive, &request), Verdict::Fail);
    }
}
