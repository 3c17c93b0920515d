//! Domain types for multi-workflow dispatch.
//!
//! Everything here is plain data: candidates matched for a trigger, the
//! staged execution plan built from them, per-workflow run results and the
//! reconciled deliverable manifest.

pub mod config;
pub mod domain;
pub mod error;

pub use config::{ConflictResolution, DispatchConfig};
pub use domain::*;
pub use error::{CoreError, Result};
