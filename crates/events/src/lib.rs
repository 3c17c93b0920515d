//! Telemetry for multi-workflow dispatch
//!
//! Provides the `plan.created` / `execution.summary` payloads, the pure
//! builders that produce them from a plan and its results, and a broadcast
//! bus for handing them to reporting collaborators.

mod bus;
pub mod telemetry;
mod types;

pub use bus::EventBus;
pub use telemetry::{describe, summarize};
pub use types::*;
