use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Sequential,
    Parallel,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }

    /// Stages holding more than one workflow run in parallel.
    pub fn for_len(len: usize) -> Self {
        if len > 1 {
            Self::Parallel
        } else {
            Self::Sequential
        }
    }
}

/// A barrier-synchronized group of workflows.
///
/// Fields are private: stages are built once by the planner and only read
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Stage {
    index: usize,
    run_mode: RunMode,
    workflow_ids: Vec<String>,
    blocking_conflicts: Vec<String>,
}

impl Stage {
    pub fn new(
        index: usize,
        workflow_ids: Vec<String>,
        mut blocking_conflicts: Vec<String>,
    ) -> Self {
        blocking_conflicts.sort();
        blocking_conflicts.dedup();
        Self {
            index,
            run_mode: RunMode::for_len(workflow_ids.len()),
            workflow_ids,
            blocking_conflicts,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn workflow_ids(&self) -> &[String] {
        &self.workflow_ids
    }

    /// Conflict keys held by this stage's workflows, sorted.
    pub fn blocking_conflicts(&self) -> &[String] {
        &self.blocking_conflicts
    }

    pub fn len(&self) -> usize {
        self.workflow_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflow_ids.is_empty()
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.workflow_ids.iter().any(|id| id == workflow_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ExecutionPlan {
    plan_id: String,
    stages: Vec<Stage>,
    overall_timeout_seconds: Option<u64>,
    allow_partial_success: bool,
    preview_only: bool,
}

impl ExecutionPlan {
    pub fn new(
        plan_id: impl Into<String>,
        stages: Vec<Stage>,
        overall_timeout_seconds: Option<u64>,
        allow_partial_success: bool,
        preview_only: bool,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            stages,
            overall_timeout_seconds,
            allow_partial_success,
            preview_only,
        }
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn overall_timeout_seconds(&self) -> Option<u64> {
        self.overall_timeout_seconds
    }

    pub fn allow_partial_success(&self) -> bool {
        self.allow_partial_success
    }

    pub fn preview_only(&self) -> bool {
        self.preview_only
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn workflow_count(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }

    /// All workflow ids in execution order.
    pub fn workflow_ids(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .flat_map(|stage| stage.workflow_ids.iter().map(String::as_str))
    }

    pub fn stage_of(&self, workflow_id: &str) -> Option<usize> {
        self.stages
            .iter()
            .find(|stage| stage.contains(workflow_id))
            .map(Stage::index)
    }
}
