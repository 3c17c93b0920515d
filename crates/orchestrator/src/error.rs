use dispatch_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Cyclic dependency between workflows: {}", cycle.join(", "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Invalid candidate set: {0}")]
    Candidate(#[from] CoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid run state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Sandbox preparation failed for {workflow_id}: {reason}")]
    Sandbox { workflow_id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Create a sandbox preparation error.
    pub fn sandbox(workflow_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Sandbox {
            workflow_id: workflow_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error happened before anything ran.
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. } | Self::Candidate(_) | Self::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
