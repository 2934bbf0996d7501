use crate::model::Issue;

pub mod agents;
pub mod fingerprint;
pub mod orchestrator;
pub mod state;

/// Everything an agent gets to see for one review run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentInput {
    pub repo: String,
    pub pr_number: i64,
    /// Raw unified diff under review.
    pub diff: String,
    /// Rendered graph context for the changed ranges.
    pub context: String,
    /// Issues still open from the previous run, so agents can re-check
    /// them instead of rediscovering.
    pub previous_open: Vec<Issue>,
}
