use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoreError, Result};

pub const DEFAULT_MAX_PARALLEL_WORKFLOWS: usize = 3;
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 2_000;
pub const DEFAULT_SANDBOX_ROOT: &str = ".wfdispatch/sandboxes";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Rename later producers to `<stem>--<workflow_id>.<ext>`.
    #[default]
    Suffix,
    /// Keep both artifacts and flag the collision as unresolved.
    Fail,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suffix => "suffix",
            Self::Fail => "fail",
        }
    }
}

/// Settings for one dispatch. Passed by value into the planner and the
/// orchestrator; never read from globals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    pub enable_multi_workflow: bool,
    pub allow_parallel_stages: bool,
    pub max_parallel_workflows: usize,
    pub conflict_resolution: ConflictResolution,
    pub stop_on_first_failure: bool,
    pub preview_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_timeout_seconds: Option<u64>,
    pub cancel_grace_ms: u64,
    pub sandbox_root: PathBuf,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enable_multi_workflow: false,
            allow_parallel_stages: true,
            max_parallel_workflows: DEFAULT_MAX_PARALLEL_WORKFLOWS,
            conflict_resolution: ConflictResolution::default(),
            stop_on_first_failure: false,
            preview_only: false,
            stage_timeout_seconds: None,
            overall_timeout_seconds: None,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            sandbox_root: PathBuf::from(DEFAULT_SANDBOX_ROOT),
        }
    }
}

impl DispatchConfig {
    /// Default settings with the multi-workflow engine switched on.
    pub fn multi_workflow() -> Self {
        Self {
            enable_multi_workflow: true,
            ..Default::default()
        }
    }

    pub fn with_parallel_stages(mut self, allow: bool) -> Self {
        self.allow_parallel_stages = allow;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel_workflows = max;
        self
    }

    pub fn with_conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.conflict_resolution = resolution;
        self
    }

    pub fn with_stop_on_first_failure(mut self, stop: bool) -> Self {
        self.stop_on_first_failure = stop;
        self
    }

    pub fn with_preview_only(mut self, preview: bool) -> Self {
        self.preview_only = preview;
        self
    }

    pub fn with_stage_timeout(mut self, seconds: u64) -> Self {
        self.stage_timeout_seconds = Some(seconds);
        self
    }

    pub fn with_overall_timeout(mut self, seconds: u64) -> Self {
        self.overall_timeout_seconds = Some(seconds);
        self
    }

    pub fn with_cancel_grace_ms(mut self, millis: u64) -> Self {
        self.cancel_grace_ms = millis;
        self
    }

    pub fn with_sandbox_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sandbox_root = root.into();
        self
    }

    pub fn allow_partial_success(&self) -> bool {
        !self.stop_on_first_failure
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_seconds.map(Duration::from_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_workflows == 0 {
            return Err(CoreError::Validation(
                "max_parallel_workflows must be at least 1".to_string(),
            ));
        }
        if self.stage_timeout_seconds == Some(0) {
            return Err(CoreError::Validation(
                "stage_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.overall_timeout_seconds == Some(0) {
            return Err(CoreError::Validation(
                "overall_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
