//! Entry point tying planning, execution, merging and telemetry together for
//! one trigger.

use std::sync::Arc;

use dispatch_core::{
    Candidate, CandidateSet, DeliverableManifest, DispatchConfig, ExecutionPlan, RunOutcome,
    RunResult,
};
use events::{describe, summarize, Event, EventBus, ExecutionSummaryEvent, PlanCreatedEvent};
use serde::Serialize;
use tracing::{info, warn};

use crate::adapter::ExecutionAdapter;
use crate::emitter::OrderedEventEmitter;
use crate::error::Result;
use crate::merger::ReconciliationMerger;
use crate::planner::Planner;
use crate::stage_orchestrator::{StageOrchestrator, StageRun};

/// Everything one dispatch produced.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub plan: ExecutionPlan,
    pub outcome: RunOutcome,
    pub stage_runs: Vec<StageRun>,
    pub results: Vec<RunResult>,
    pub manifest: DeliverableManifest,
    pub plan_created: PlanCreatedEvent,
    pub summary: ExecutionSummaryEvent,
}

pub struct WorkflowDispatcher {
    config: DispatchConfig,
    adapter: Arc<dyn ExecutionAdapter>,
    emitter: OrderedEventEmitter,
}

impl WorkflowDispatcher {
    pub fn new(config: DispatchConfig, adapter: Arc<dyn ExecutionAdapter>) -> Self {
        Self {
            config,
            adapter,
            emitter: OrderedEventEmitter::new(EventBus::new()),
        }
    }

    /// Publish events on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.emitter = OrderedEventEmitter::new(bus);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        self.emitter.bus()
    }

    /// Plan without executing and publish the `plan.created` event.
    pub fn preview(&self, trigger_id: &str, candidates: Vec<Candidate>) -> Result<PlanCreatedEvent> {
        let plan = self.build_plan(trigger_id, candidates)?;
        let plan_created = describe(&plan);
        self.emitter.emit(Event::PlanCreated(plan_created.clone()));
        Ok(plan_created)
    }

    /// Plan, execute, merge and summarize.
    ///
    /// Only planning problems (invalid candidates, cycles, bad config)
    /// return `Err`; workflow failures are reported in the summary.
    pub async fn dispatch(&self, trigger_id: &str, candidates: Vec<Candidate>) -> Result<DispatchReport> {
        let plan = self.build_plan(trigger_id, candidates)?;
        let plan_created = describe(&plan);
        self.emitter.emit(Event::PlanCreated(plan_created.clone()));

        let orchestrator = StageOrchestrator::new(Arc::clone(&self.adapter), self.config.clone())
            .with_emitter(self.emitter.clone());
        let run = orchestrator.run(&plan).await?;
        let results = run.results();

        let merger = ReconciliationMerger::from_policy(self.config.conflict_resolution);
        let manifest = merger.merge(&run.stage_runs);

        let outcome = if manifest.has_unresolved() {
            warn!(
                plan_id = %plan.plan_id(),
                collisions = manifest.collisions.iter().filter(|c| !c.is_resolved()).count(),
                "Unresolved artifact collisions, downgrading outcome"
            );
            run.outcome.at_least_partial()
        } else {
            run.outcome
        };

        let summary = summarize(&plan, &results, &manifest, outcome);
        self.emitter.emit(Event::ExecutionSummary(summary.clone()));

        info!(
            plan_id = %plan.plan_id(),
            trigger_id = %trigger_id,
            outcome = outcome.as_str(),
            artifacts = manifest.entries.len(),
            "Dispatch finished"
        );

        Ok(DispatchReport {
            plan,
            outcome,
            stage_runs: run.stage_runs,
            results,
            manifest,
            plan_created,
            summary,
        })
    }

    fn build_plan(&self, trigger_id: &str, candidates: Vec<Candidate>) -> Result<ExecutionPlan> {
        let set = CandidateSet::new(candidates)?;
        let set = if self.config.enable_multi_workflow {
            set
        } else {
            legacy_selection(&set)?
        };
        Planner::new(self.config.clone()).plan(trigger_id, &set)
    }
}

/// Single-workflow path: keep the first candidate by `(priority, id)` and
/// drop its dependencies, which can only point at discarded candidates.
fn legacy_selection(set: &CandidateSet) -> Result<CandidateSet> {
    let Some(first) = set.first_by_priority() else {
        return Ok(CandidateSet::default());
    };
    let mut chosen = first.clone();

    if set.len() > 1 {
        let dropped: Vec<&str> = set
            .iter()
            .filter(|c| c.id != chosen.id)
            .map(|c| c.id.as_str())
            .collect();
        info!(
            selected = %chosen.id,
            dropped = ?dropped,
            "Multi-workflow dispatch disabled, running a single workflow"
        );
    }

    chosen.dependencies.clear();
    Ok(CandidateSet::new([chosen])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(candidates: Vec<Candidate>) -> CandidateSet {
        CandidateSet::new(candidates).unwrap()
    }

    #[test]
    fn test_legacy_selection_picks_lowest_priority() {
        let selected = legacy_selection(&set(vec![
            Candidate::new("weekly-digest", 2),
            Candidate::new("policy-overview", 1),
            Candidate::new("compliance-advisory", 1),
        ]))
        .unwrap();

        assert_eq!(selected.len(), 1);
        assert!(selected.get("compliance-advisory").is_some());
    }

    #[test]
    fn test_legacy_selection_clears_dependencies() {
        let selected = legacy_selection(&set(vec![
            Candidate::new("a", 0).with_dependency("b"),
            Candidate::new("b", 5),
        ]))
        .unwrap();

        let only = selected.get("a").unwrap();
        assert!(only.dependencies.is_empty());
    }

    #[test]
    fn test_legacy_selection_empty() {
        assert!(legacy_selection(&CandidateSet::default()).unwrap().is_empty());
    }
}
