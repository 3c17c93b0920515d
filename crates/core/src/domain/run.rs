use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Executed,
    Skipped,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    PreviewOnlyGuard,
    StopOnFirstFailure,
    OverallTimeout,
    NoCandidates,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreviewOnlyGuard => "preview_only_guard",
            Self::StopOnFirstFailure => "stop_on_first_failure",
            Self::OverallTimeout => "overall_timeout",
            Self::NoCandidates => "no_candidates",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Cancelled,
    ExecutionFailed,
    ConflictUnresolvable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ExecutionFailed => "execution_failed",
            Self::ConflictUnresolvable => "conflict_unresolvable",
        }
    }
}

/// Outcome of a single workflow within one plan run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct RunResult {
    pub workflow_id: String,
    pub status: RunStatus,
    /// Artifact paths relative to the workflow's sandbox.
    #[serde(default)]
    pub created_artifacts: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Short human-readable note from the adapter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "typescript", ts(skip))]
    pub duration: Duration,
}

impl RunResult {
    pub fn executed(workflow_id: impl Into<String>, created_artifacts: Vec<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: RunStatus::Executed,
            created_artifacts,
            errors: Vec::new(),
            error_kind: None,
            skip_reason: None,
            message: None,
            duration: Duration::ZERO,
        }
    }

    pub fn failed(workflow_id: impl Into<String>, kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: RunStatus::Failed,
            created_artifacts: Vec::new(),
            errors: vec![error.into()],
            error_kind: Some(kind),
            skip_reason: None,
            message: None,
            duration: Duration::ZERO,
        }
    }

    pub fn skipped(workflow_id: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: RunStatus::Skipped,
            created_artifacts: Vec::new(),
            errors: Vec::new(),
            error_kind: None,
            skip_reason: Some(reason),
            message: None,
            duration: Duration::ZERO,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.created_artifacts = artifacts;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == RunStatus::Skipped
    }
}

/// User-visible result of a whole plan run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    PartiallyCompleted,
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Aborted => "aborted",
        }
    }

    /// Downgrades to at least `PartiallyCompleted`; `Aborted` stays.
    pub fn at_least_partial(self) -> Self {
        self.max(Self::PartiallyCompleted)
    }
}

/// Lifecycle of one plan run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    #[default]
    Pending,
    Running {
        stage: usize,
    },
    Completed,
    PartiallyCompleted,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running { .. } => "running",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        match self {
            Self::Completed => Some(RunOutcome::Completed),
            Self::PartiallyCompleted => Some(RunOutcome::PartiallyCompleted),
            Self::Aborted => Some(RunOutcome::Aborted),
            Self::Pending | Self::Running { .. } => None,
        }
    }
}

impl From<RunOutcome> for RunState {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => Self::Completed,
            RunOutcome::PartiallyCompleted => Self::PartiallyCompleted,
            RunOutcome::Aborted => Self::Aborted,
        }
    }
}
