mod candidate;
mod manifest;
mod plan;
mod run;

pub use candidate::{validate_workflow_id, Candidate, CandidateSet};
pub use manifest::{CollisionRecord, DeliverableManifest, ManifestEntry, ManifestError, Resolution};
pub use plan::{ExecutionPlan, RunMode, Stage};
pub use run::{ErrorKind, RunOutcome, RunResult, RunState, RunStatus, SkipReason};
