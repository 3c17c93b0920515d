//! Event types published by the dispatcher

use chrono::{DateTime, Utc};
use dispatch_core::{CollisionRecord, ErrorKind, RunMode, RunOutcome, RunStatus, SkipReason};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with transport metadata.
///
/// Only the envelope carries ids and timestamps; the payloads stay
/// reproducible across identical runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Position in the emitting dispatcher's stream
    pub sequence: u64,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

/// All events a dispatch can emit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Plan built; emitted before any execution, also for previews
    #[serde(rename = "plan.created")]
    PlanCreated(PlanCreatedEvent),

    /// Terminal report, exactly one per plan run
    #[serde(rename = "execution.summary")]
    ExecutionSummary(ExecutionSummaryEvent),

    #[serde(rename = "stage.started")]
    StageStarted {
        plan_id: String,
        index: usize,
        run_mode: RunMode,
        workflows: Vec<String>,
    },

    #[serde(rename = "stage.completed")]
    StageCompleted {
        plan_id: String,
        index: usize,
        failed: usize,
        timed_out: bool,
    },

    #[serde(rename = "workflow.finished")]
    WorkflowFinished {
        plan_id: String,
        workflow_id: String,
        status: RunStatus,
    },
}

impl Event {
    /// Get the plan ID this event belongs to
    pub fn plan_id(&self) -> &str {
        match self {
            Event::PlanCreated(event) => &event.plan_id,
            Event::ExecutionSummary(event) => &event.plan.plan_id,
            Event::StageStarted { plan_id, .. } => plan_id,
            Event::StageCompleted { plan_id, .. } => plan_id,
            Event::WorkflowFinished { plan_id, .. } => plan_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::PlanCreated(_) => "plan.created",
            Event::ExecutionSummary(_) => "execution.summary",
            Event::StageStarted { .. } => "stage.started",
            Event::StageCompleted { .. } => "stage.completed",
            Event::WorkflowFinished { .. } => "workflow.finished",
        }
    }
}

/// Stage layout as declared by the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StagePayload {
    pub index: usize,
    pub run_mode: RunMode,
    pub workflows: Vec<String>,
    pub blocking_conflicts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct PlanCreatedEvent {
    pub plan_id: String,
    pub stage_count: usize,
    pub workflow_count: usize,
    pub allow_partial_success: bool,
    pub preview_only: bool,
    pub stages: Vec<StagePayload>,
}

/// Per-workflow line in a stage run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct WorkflowRunPayload {
    pub workflow_name: String,
    pub status: RunStatus,
    pub created_files: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StageRunPayload {
    pub index: usize,
    pub run_mode: RunMode,
    pub blocking_conflicts: Vec<String>,
    pub workflows: Vec<WorkflowRunPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ErrorPayload {
    pub workflow_name: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Executed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ExecutionSummaryEvent {
    #[serde(flatten)]
    pub plan: PlanCreatedEvent,
    pub stage_runs: Vec<StageRunPayload>,
    pub status: SummaryStatus,
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorPayload>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collisions: Vec<CollisionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_created() -> PlanCreatedEvent {
        PlanCreatedEvent {
            plan_id: "plan-abc".to_string(),
            stage_count: 1,
            workflow_count: 1,
            allow_partial_success: true,
            preview_only: false,
            stages: vec![StagePayload {
                index: 0,
                run_mode: RunMode::Sequential,
                workflows: vec!["policy-overview".to_string()],
                blocking_conflicts: vec![],
            }],
        }
    }

    #[test]
    fn test_event_envelope_creation() {
        let envelope = EventEnvelope::new(Event::PlanCreated(plan_created())).with_sequence(4);

        assert!(!envelope.id.is_nil());
        assert_eq!(envelope.sequence, 4);
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_plan_created_serialization() {
        let json = serde_json::to_string(&Event::PlanCreated(plan_created())).unwrap();
        assert!(json.contains("\"type\":\"plan.created\""));
        assert!(json.contains("\"stage_count\":1"));
        assert!(json.contains("\"run_mode\":\"sequential\""));
    }

    #[test]
    fn test_summary_flattens_plan_fields() {
        let summary = ExecutionSummaryEvent {
            plan: plan_created(),
            stage_runs: vec![],
            status: SummaryStatus::Skipped,
            outcome: RunOutcome::Completed,
            skip_reason: Some(SkipReason::PreviewOnlyGuard),
            errors: None,
            collisions: vec![],
        };

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["plan_id"], "plan-abc");
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["skip_reason"], "preview_only_guard");
        assert!(value.get("errors").is_none());
        assert!(value.get("collisions").is_none());
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"stage.completed","plan_id":"plan-1","index":2,"failed":1,"timed_out":false}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        match event {
            Event::StageCompleted { index, failed, .. } => {
                assert_eq!(index, 2);
                assert_eq!(failed, 1);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_plan_id_and_kind() {
        let event = Event::WorkflowFinished {
            plan_id: "plan-9".to_string(),
            workflow_id: "a".to_string(),
            status: RunStatus::Failed,
        };
        assert_eq!(event.plan_id(), "plan-9");
        assert_eq!(event.kind(), "workflow.finished");

        let created = Event::PlanCreated(plan_created());
        assert_eq!(created.plan_id(), "plan-abc");
    }
}
