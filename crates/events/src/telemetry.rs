//! Pure builders for the two correlated telemetry payloads.
//!
//! Both functions walk the plan's own stage and workflow order, never the
//! order in which results arrived, so identical runs serialize to identical
//! bytes.

use std::collections::HashMap;

use dispatch_core::{
    DeliverableManifest, ExecutionPlan, RunOutcome, RunResult, RunStatus, SkipReason, Stage,
};

use crate::types::{
    ErrorPayload, ExecutionSummaryEvent, PlanCreatedEvent, StagePayload, StageRunPayload,
    SummaryStatus, WorkflowRunPayload,
};

/// Describe a plan before (or instead of) running it.
pub fn describe(plan: &ExecutionPlan) -> PlanCreatedEvent {
    PlanCreatedEvent {
        plan_id: plan.plan_id().to_string(),
        stage_count: plan.stage_count(),
        workflow_count: plan.workflow_count(),
        allow_partial_success: plan.allow_partial_success(),
        preview_only: plan.preview_only(),
        stages: plan.stages().iter().map(stage_payload).collect(),
    }
}

/// Summarize a finished plan run.
pub fn summarize(
    plan: &ExecutionPlan,
    results: &[RunResult],
    manifest: &DeliverableManifest,
    outcome: RunOutcome,
) -> ExecutionSummaryEvent {
    let by_id: HashMap<&str, &RunResult> = results
        .iter()
        .map(|result| (result.workflow_id.as_str(), result))
        .collect();

    let stage_runs: Vec<StageRunPayload> = plan
        .stages()
        .iter()
        .map(|stage| StageRunPayload {
            index: stage.index(),
            run_mode: stage.run_mode(),
            blocking_conflicts: stage.blocking_conflicts().to_vec(),
            workflows: stage
                .workflow_ids()
                .iter()
                .map(|id| workflow_payload(id, by_id.get(id.as_str()).copied(), manifest))
                .collect(),
        })
        .collect();

    let all_skipped = plan
        .workflow_ids()
        .all(|id| by_id.get(id).map_or(true, |result| result.is_skipped()));

    let (status, skip_reason) = if all_skipped {
        (SummaryStatus::Skipped, Some(skip_reason(plan, results)))
    } else {
        (SummaryStatus::Executed, None)
    };

    let mut errors: Vec<ErrorPayload> = plan
        .workflow_ids()
        .filter_map(|id| by_id.get(id))
        .filter(|result| result.is_failed())
        .map(|result| ErrorPayload {
            workflow_name: result.workflow_id.clone(),
            error: failure_text(result),
            error_kind: result.error_kind,
        })
        .collect();
    errors.extend(manifest.errors.iter().map(|err| ErrorPayload {
        workflow_name: err.workflow_id.clone(),
        error: err.error.clone(),
        error_kind: Some(err.kind),
    }));

    ExecutionSummaryEvent {
        plan: describe(plan),
        stage_runs,
        status,
        outcome,
        skip_reason,
        errors: if errors.is_empty() { None } else { Some(errors) },
        collisions: manifest.collisions.clone(),
    }
}

fn stage_payload(stage: &Stage) -> StagePayload {
    StagePayload {
        index: stage.index(),
        run_mode: stage.run_mode(),
        workflows: stage.workflow_ids().to_vec(),
        blocking_conflicts: stage.blocking_conflicts().to_vec(),
    }
}

fn workflow_payload(
    workflow_id: &str,
    result: Option<&RunResult>,
    manifest: &DeliverableManifest,
) -> WorkflowRunPayload {
    let Some(result) = result else {
        return WorkflowRunPayload {
            workflow_name: workflow_id.to_string(),
            status: RunStatus::Skipped,
            created_files: Vec::new(),
            message: "no result recorded".to_string(),
        };
    };

    let created_files = match result.status {
        RunStatus::Executed => manifest
            .entries_for(workflow_id)
            .map(|entry| entry.path.clone())
            .collect(),
        RunStatus::Failed | RunStatus::Skipped => result.created_artifacts.clone(),
    };

    let message = match result.status {
        RunStatus::Executed => result
            .message
            .clone()
            .unwrap_or_else(|| "executed".to_string()),
        RunStatus::Failed => failure_text(result),
        RunStatus::Skipped => match result.skip_reason {
            Some(reason) => format!("skipped: {}", reason.as_str()),
            None => "skipped".to_string(),
        },
    };

    WorkflowRunPayload {
        workflow_name: workflow_id.to_string(),
        status: result.status,
        created_files,
        message,
    }
}

fn failure_text(result: &RunResult) -> String {
    if !result.errors.is_empty() {
        return result.errors.join("; ");
    }
    result
        .error_kind
        .map(|kind| kind.as_str().to_string())
        .unwrap_or_else(|| "failed".to_string())
}

fn skip_reason(plan: &ExecutionPlan, results: &[RunResult]) -> SkipReason {
    if plan.preview_only() {
        return SkipReason::PreviewOnlyGuard;
    }
    if plan.workflow_count() == 0 {
        return SkipReason::NoCandidates;
    }
    results
        .iter()
        .find_map(|result| result.skip_reason)
        .unwrap_or(SkipReason::StopOnFirstFailure)
}
