//! Stage-by-stage execution of an [`ExecutionPlan`].
//!
//! Stages run strictly one after another. Inside a stage every workflow is
//! launched through a bounded worker pool and the stage only completes once
//! every launched execution has returned, timed out or been cancelled.
//! Results are written into index-addressed slots, so the stage's result
//! list always follows the plan's declared order no matter which execution
//! finished first.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{
    DispatchConfig, ErrorKind, ExecutionPlan, RunMode, RunOutcome, RunResult, SkipReason, Stage,
};
use events::Event;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::adapter::{CancelSignal, ExecutionAdapter, RunSpec, SandboxHandle};
use crate::emitter::OrderedEventEmitter;
use crate::error::Result;
use crate::state_machine::RunStateMachine;

/// Results of one stage, in the stage's declared workflow order.
#[derive(Debug, Clone, Serialize)]
pub struct StageRun {
    pub index: usize,
    pub run_mode: RunMode,
    pub blocking_conflicts: Vec<String>,
    pub results: Vec<RunResult>,
    pub timed_out: bool,
}

impl StageRun {
    fn skipped(stage: &Stage, reason: SkipReason) -> Self {
        Self {
            index: stage.index(),
            run_mode: stage.run_mode(),
            blocking_conflicts: stage.blocking_conflicts().to_vec(),
            results: stage
                .workflow_ids()
                .iter()
                .map(|id| RunResult::skipped(id.as_str(), reason))
                .collect(),
            timed_out: false,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }
}

/// Everything one plan run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PlanRun {
    pub plan_id: String,
    pub outcome: RunOutcome,
    pub stage_runs: Vec<StageRun>,
}

impl PlanRun {
    /// All results, stage by stage, each stage in declared order.
    pub fn results(&self) -> Vec<RunResult> {
        self.stage_runs
            .iter()
            .flat_map(|stage| stage.results.iter().cloned())
            .collect()
    }

    pub fn result(&self, workflow_id: &str) -> Option<&RunResult> {
        self.stage_runs
            .iter()
            .flat_map(|stage| stage.results.iter())
            .find(|result| result.workflow_id == workflow_id)
    }
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Pending,
    Running,
    Done(RunResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageEnd {
    Finished,
    TimedOut,
    Cancelled,
}

pub struct StageOrchestrator {
    adapter: Arc<dyn ExecutionAdapter>,
    config: DispatchConfig,
    emitter: Option<OrderedEventEmitter>,
}

impl StageOrchestrator {
    pub fn new(adapter: Arc<dyn ExecutionAdapter>, config: DispatchConfig) -> Self {
        Self {
            adapter,
            config,
            emitter: None,
        }
    }

    pub fn with_emitter(mut self, emitter: OrderedEventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Drive the plan to a terminal state.
    ///
    /// Workflow failures never surface as `Err`; they are recorded in the
    /// returned [`PlanRun`]. Only an internal state-machine violation does.
    pub async fn run(&self, plan: &ExecutionPlan) -> Result<PlanRun> {
        let mut machine = RunStateMachine::new();

        if plan.preview_only() {
            info!(
                plan_id = %plan.plan_id(),
                workflow_count = plan.workflow_count(),
                "Preview only, no workflow will be executed"
            );
            machine.finish(RunOutcome::Completed)?;
            return Ok(PlanRun {
                plan_id: plan.plan_id().to_string(),
                outcome: RunOutcome::Completed,
                stage_runs: plan
                    .stages()
                    .iter()
                    .map(|stage| StageRun::skipped(stage, SkipReason::PreviewOnlyGuard))
                    .collect(),
            });
        }

        let stop_on_failure = !plan.allow_partial_success();
        let deadline = plan
            .overall_timeout_seconds()
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        let mut stage_runs = Vec::with_capacity(plan.stage_count());
        let mut abort_reason: Option<SkipReason> = None;
        let mut any_failed = false;

        for stage in plan.stages() {
            if let Some(reason) = abort_reason {
                debug!(
                    plan_id = %plan.plan_id(),
                    stage = stage.index(),
                    reason = reason.as_str(),
                    "Skipping stage"
                );
                stage_runs.push(StageRun::skipped(stage, reason));
                continue;
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                warn!(
                    plan_id = %plan.plan_id(),
                    stage = stage.index(),
                    "Overall timeout elapsed, not starting further stages"
                );
                abort_reason = Some(SkipReason::OverallTimeout);
                stage_runs.push(StageRun::skipped(stage, SkipReason::OverallTimeout));
                continue;
            }
            let budget = match (self.config.stage_timeout(), remaining) {
                (Some(stage_budget), Some(left)) => Some(stage_budget.min(left)),
                (stage_budget, left) => stage_budget.or(left),
            };

            machine.start_stage(stage.index())?;
            let stage_run = self.run_stage(plan, stage, budget, stop_on_failure).await;

            let failed = stage_run.failed_count();
            if failed > 0 {
                any_failed = true;
                if stop_on_failure {
                    warn!(
                        plan_id = %plan.plan_id(),
                        stage = stage.index(),
                        failed,
                        "Workflow failed with stop_on_first_failure set, aborting remaining stages"
                    );
                    abort_reason = Some(SkipReason::StopOnFirstFailure);
                }
            }
            if abort_reason.is_none()
                && stage_run.timed_out
                && deadline.is_some_and(|d| Instant::now() >= d)
            {
                warn!(
                    plan_id = %plan.plan_id(),
                    stage = stage.index(),
                    "Overall timeout elapsed during stage, aborting plan"
                );
                abort_reason = Some(SkipReason::OverallTimeout);
            }
            stage_runs.push(stage_run);
        }

        let outcome = if abort_reason.is_some() {
            RunOutcome::Aborted
        } else if any_failed {
            RunOutcome::PartiallyCompleted
        } else {
            RunOutcome::Completed
        };
        machine.finish(outcome)?;

        info!(
            plan_id = %plan.plan_id(),
            outcome = outcome.as_str(),
            stages = stage_runs.len(),
            "Plan run finished"
        );

        Ok(PlanRun {
            plan_id: plan.plan_id().to_string(),
            outcome,
            stage_runs,
        })
    }

    async fn run_stage(
        &self,
        plan: &ExecutionPlan,
        stage: &Stage,
        budget: Option<Duration>,
        stop_on_failure: bool,
    ) -> StageRun {
        info!(
            plan_id = %plan.plan_id(),
            stage = stage.index(),
            run_mode = stage.run_mode().as_str(),
            workflows = ?stage.workflow_ids(),
            budget_secs = budget.map(|b| b.as_secs_f64()),
            "Stage started"
        );
        self.emit(Event::StageStarted {
            plan_id: plan.plan_id().to_string(),
            index: stage.index(),
            run_mode: stage.run_mode(),
            workflows: stage.workflow_ids().to_vec(),
        });

        let slots: Arc<Mutex<Vec<Slot>>> = Arc::new(Mutex::new(
            stage.workflow_ids().iter().map(|_| Slot::Pending).collect(),
        ));
        let stage_signal = CancelSignal::new();
        let pool = Arc::new(Semaphore::new(self.config.max_parallel_workflows.max(1)));
        let mut tasks = JoinSet::new();

        for (slot, workflow_id) in stage.workflow_ids().iter().enumerate() {
            let spec = RunSpec {
                workflow_id: workflow_id.clone(),
                plan_id: plan.plan_id().to_string(),
                sandbox: SandboxHandle::for_workflow(
                    &self.config.sandbox_root,
                    plan.plan_id(),
                    workflow_id,
                ),
            };
            let adapter = Arc::clone(&self.adapter);
            let slots = Arc::clone(&slots);
            let pool = Arc::clone(&pool);
            let signal = stage_signal.clone();
            let emitter = self.emitter.clone();
            let plan_id = spec.plan_id.clone();

            tasks.spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return;
                };
                if signal.is_cancelled() {
                    return;
                }
                slots.lock().await[slot] = Slot::Running;

                let result = execute_one(adapter.as_ref(), spec, signal.child()).await;
                let failed = result.is_failed();
                if let Some(emitter) = emitter {
                    emitter.emit(Event::WorkflowFinished {
                        plan_id,
                        workflow_id: result.workflow_id.clone(),
                        status: result.status,
                    });
                }
                slots.lock().await[slot] = Slot::Done(result);

                if failed && stop_on_failure {
                    signal.cancel();
                }
            });
        }

        let end = tokio::select! {
            _ = drain(&mut tasks) => StageEnd::Finished,
            _ = sleep_for(budget) => StageEnd::TimedOut,
            _ = stage_signal.cancelled() => StageEnd::Cancelled,
        };

        if end != StageEnd::Finished {
            if end == StageEnd::TimedOut {
                warn!(
                    plan_id = %plan.plan_id(),
                    stage = stage.index(),
                    "Stage budget elapsed, cancelling outstanding executions"
                );
            }
            stage_signal.cancel();

            let grace = self.config.cancel_grace();
            if tokio::time::timeout(grace, drain(&mut tasks)).await.is_err() {
                warn!(
                    plan_id = %plan.plan_id(),
                    stage = stage.index(),
                    grace_ms = grace.as_millis() as u64,
                    "Executions ignored cancellation, aborting them"
                );
                tasks.abort_all();
                drain(&mut tasks).await;
            }
        }

        let timed_out = end == StageEnd::TimedOut;
        let slots = std::mem::take(&mut *slots.lock().await);
        let results: Vec<RunResult> = stage
            .workflow_ids()
            .iter()
            .zip(slots)
            .map(|(workflow_id, slot)| match slot {
                Slot::Done(result) => result,
                Slot::Running if timed_out => RunResult::failed(
                    workflow_id.as_str(),
                    ErrorKind::Timeout,
                    timeout_message(budget),
                ),
                Slot::Pending if timed_out => RunResult::failed(
                    workflow_id.as_str(),
                    ErrorKind::Timeout,
                    "stage budget elapsed before the workflow could start",
                ),
                Slot::Running => RunResult::failed(
                    workflow_id.as_str(),
                    ErrorKind::Cancelled,
                    "did not stop within the cancellation grace period",
                ),
                Slot::Pending => RunResult::skipped(workflow_id.as_str(), SkipReason::StopOnFirstFailure),
            })
            .collect();

        let stage_run = StageRun {
            index: stage.index(),
            run_mode: stage.run_mode(),
            blocking_conflicts: stage.blocking_conflicts().to_vec(),
            results,
            timed_out,
        };

        info!(
            plan_id = %plan.plan_id(),
            stage = stage.index(),
            failed = stage_run.failed_count(),
            timed_out,
            "Stage completed"
        );
        self.emit(Event::StageCompleted {
            plan_id: plan.plan_id().to_string(),
            index: stage.index(),
            failed: stage_run.failed_count(),
            timed_out,
        });

        stage_run
    }

    fn emit(&self, event: Event) {
        if let Some(ref emitter) = self.emitter {
            emitter.emit(event);
        }
    }
}

/// Prepare the sandbox and run the adapter, turning panics into failures.
async fn execute_one(adapter: &dyn ExecutionAdapter, spec: RunSpec, cancel: CancelSignal) -> RunResult {
    let workflow_id = spec.workflow_id.clone();
    let started = Instant::now();

    if let Err(e) = spec.sandbox.prepare(&workflow_id).await {
        error!(workflow_id = %workflow_id, error = %e, "Sandbox preparation failed");
        return RunResult::failed(workflow_id, ErrorKind::ExecutionFailed, e.to_string());
    }

    debug!(
        workflow_id = %workflow_id,
        sandbox = %spec.sandbox.path().display(),
        "Executing workflow"
    );

    let mut result = match AssertUnwindSafe(adapter.execute(spec, cancel)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => RunResult::failed(
            workflow_id.as_str(),
            ErrorKind::ExecutionFailed,
            format!("execution panicked: {}", panic_message(panic.as_ref())),
        ),
    }
    .with_duration(started.elapsed());
    // Slots are addressed by position; the id must match the plan.
    result.workflow_id = workflow_id;

    if result.is_failed() {
        error!(
            workflow_id = %result.workflow_id,
            error_kind = result.error_kind.map(|k| k.as_str()),
            errors = ?result.errors,
            "Workflow failed"
        );
    } else {
        debug!(
            workflow_id = %result.workflow_id,
            status = result.status.as_str(),
            artifacts = result.created_artifacts.len(),
            "Workflow returned"
        );
    }

    result
}

async fn drain(tasks: &mut JoinSet<()>) {
    while tasks.join_next().await.is_some() {}
}

async fn sleep_for(budget: Option<Duration>) {
    match budget {
        Some(budget) => tokio::time::sleep(budget).await,
        None => std::future::pending().await,
    }
}

fn timeout_message(budget: Option<Duration>) -> String {
    match budget {
        Some(budget) => format!("did not finish within stage budget of {}s", budget.as_secs()),
        None => "did not finish within stage budget".to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
