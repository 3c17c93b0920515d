//! Contract between the orchestrator and whatever runs a workflow's
//! business logic.

use async_trait::async_trait;
use dispatch_core::{validate_workflow_id, RunResult};
use std::path::{Path, PathBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{OrchestratorError, Result};

/// Isolated working directory owned by one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    root: PathBuf,
}

impl SandboxHandle {
    /// `<sandbox_root>/<plan_id>/<workflow_id>`
    pub fn for_workflow(sandbox_root: &Path, plan_id: &str, workflow_id: &str) -> Self {
        Self {
            root: sandbox_root.join(plan_id).join(workflow_id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Start the execution from an empty directory.
    ///
    /// Anything left by an earlier run of the same plan is removed first.
    pub async fn prepare(&self, workflow_id: &str) -> Result<()> {
        validate_workflow_id(workflow_id)
            .map_err(|e| OrchestratorError::sandbox(workflow_id, e.to_string()))?;

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(OrchestratorError::sandbox(workflow_id, e.to_string())),
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| OrchestratorError::sandbox(workflow_id, e.to_string()))
    }
}

/// Everything an adapter gets for one execution.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub workflow_id: String,
    pub plan_id: String,
    pub sandbox: SandboxHandle,
}

/// Cooperative, stage-scoped cancellation.
///
/// Adapters must watch it and return promptly once it fires.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A signal that fires with this one but can also be cancelled alone.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }
}

/// Runs one workflow in its sandbox.
///
/// Implementations never let a fault escape: every internal error becomes a
/// `failed` [`RunResult`] with a populated `errors` list.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn execute(&self, spec: RunSpec, cancel: CancelSignal) -> RunResult;
}
