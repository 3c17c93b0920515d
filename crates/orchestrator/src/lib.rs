pub mod adapter;
pub mod adapters;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod merger;
pub mod planner;
pub mod stage_orchestrator;
pub mod state_machine;

pub use adapter::{CancelSignal, ExecutionAdapter, RunSpec, SandboxHandle};
pub use adapters::CommandAdapter;
pub use dispatcher::{DispatchReport, WorkflowDispatcher};
pub use emitter::OrderedEventEmitter;
pub use error::{OrchestratorError, Result};
pub use merger::{FailStrategy, ReconciliationMerger, ReconciliationStrategy, SuffixStrategy};
pub use planner::Planner;
pub use stage_orchestrator::{PlanRun, StageOrchestrator, StageRun};
pub use state_machine::RunStateMachine;
