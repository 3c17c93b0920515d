use dispatch_core::{RunOutcome, RunState};

use crate::error::{OrchestratorError, Result};

/// Tracks one plan run through
/// `Pending -> Running(0) -> ... -> Running(n-1) -> terminal`.
#[derive(Debug, Default)]
pub struct RunStateMachine {
    state: RunState,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn validate_transition(from: &RunState, to: &RunState) -> Result<()> {
        if Self::is_allowed(from, to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: describe(from),
                to: describe(to),
            })
        }
    }

    pub fn can_transition(from: &RunState, to: &RunState) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    fn is_allowed(from: &RunState, to: &RunState) -> bool {
        match (from, to) {
            (RunState::Pending, RunState::Running { stage }) => *stage == 0,
            // Nothing ran: an empty plan, or a budget spent before stage 0.
            (RunState::Pending, RunState::Completed | RunState::Aborted) => true,
            (RunState::Running { stage: current }, RunState::Running { stage: next }) => {
                *next == current + 1
            }
            (RunState::Running { .. }, to) => to.is_terminal(),
            _ => false,
        }
    }

    pub fn start_stage(&mut self, stage: usize) -> Result<()> {
        self.advance(RunState::Running { stage })
    }

    pub fn finish(&mut self, outcome: RunOutcome) -> Result<()> {
        self.advance(outcome.into())
    }

    fn advance(&mut self, to: RunState) -> Result<()> {
        Self::validate_transition(&self.state, &to)?;
        self.state = to;
        Ok(())
    }
}

fn describe(state: &RunState) -> String {
    match state {
        RunState::Running { stage } => format!("running(stage {})", stage),
        other => other.as_str().to_string(),
    }
}
