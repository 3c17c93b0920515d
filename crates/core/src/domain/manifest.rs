use serde::{Deserialize, Serialize};

use super::ErrorKind;

/// One artifact claimed by a workflow after reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ManifestEntry {
    /// Final deliverable path.
    pub path: String,
    pub workflow_id: String,
    /// Path as produced by the workflow, before any rename.
    pub original_path: String,
    /// Set when a collision on this path could not be resolved.
    #[serde(default)]
    pub unresolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Renamed { path: String },
    Unresolved { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct CollisionRecord {
    pub path: String,
    /// Workflow that claimed the path first.
    pub claimant: String,
    /// Workflow whose artifact collided.
    pub producer: String,
    pub resolution: Resolution,
}

impl CollisionRecord {
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Renamed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ManifestError {
    pub workflow_id: String,
    pub kind: ErrorKind,
    pub error: String,
}

impl ManifestError {
    /// A collision the configured policy refused to resolve.
    pub fn unresolvable(workflow_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            kind: ErrorKind::ConflictUnresolvable,
            error: error.into(),
        }
    }
}

/// Final mapping of deliverable paths to their owning workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct DeliverableManifest {
    pub entries: Vec<ManifestEntry>,
    pub collisions: Vec<CollisionRecord>,
    pub errors: Vec<ManifestError>,
}

impl DeliverableManifest {
    /// First workflow owning `path`.
    pub fn owner(&self, path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.path == path)
            .map(|entry| entry.workflow_id.as_str())
    }

    pub fn entries_for<'a>(&'a self, workflow_id: &'a str) -> impl Iterator<Item = &'a ManifestEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.workflow_id == workflow_id)
    }

    pub fn has_unresolved(&self) -> bool {
        self.collisions.iter().any(|c| !c.is_resolved())
    }
}
