use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CoreError, Result};

/// One schedulable workflow recommended for the current trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Candidate {
    pub id: String,
    /// Lower values are scheduled first.
    #[serde(default)]
    pub priority: i32,
    /// Opaque resource names that must not be touched concurrently.
    #[serde(default)]
    pub conflict_keys: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            priority,
            conflict_keys: BTreeSet::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_conflict_key(mut self, key: impl Into<String>) -> Self {
        self.conflict_keys.insert(key.into());
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn conflicts_with(&self, other: &Candidate) -> bool {
        !self.conflict_keys.is_disjoint(&other.conflict_keys)
    }

    /// Scheduling order among candidates whose dependencies are satisfied.
    pub fn sort_key(&self) -> (i32, &str) {
        (self.priority, self.id.as_str())
    }
}

/// Check that `id` can name a sandbox directory on its own.
///
/// Ids become a single path component, so separators, NUL and the `.`/`..`
/// components are rejected.
pub fn validate_workflow_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(CoreError::EmptyCandidateId);
    }
    let reason = if id == "." || id == ".." {
        Some("relative path component")
    } else if id.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if id.contains('\0') {
        Some("contains a NUL byte")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::InvalidCandidateId {
            id: id.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Validated, immutable set of candidates for one trigger.
///
/// Iteration order is by id, so nothing downstream depends on the order
/// in which candidates were matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    candidates: BTreeMap<String, Candidate>,
}

impl CandidateSet {
    pub fn new(candidates: impl IntoIterator<Item = Candidate>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for candidate in candidates {
            validate_workflow_id(&candidate.id)?;
            if map.contains_key(&candidate.id) {
                return Err(CoreError::DuplicateCandidate(candidate.id));
            }
            map.insert(candidate.id.clone(), candidate);
        }

        for candidate in map.values() {
            if let Some(missing) = candidate
                .dependencies
                .iter()
                .find(|dep| !map.contains_key(*dep))
            {
                return Err(CoreError::UnknownDependency {
                    workflow_id: candidate.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        Ok(Self { candidates: map })
    }

    pub fn get(&self, id: &str) -> Option<&Candidate> {
        self.candidates.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.values()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The candidate that would run first on its own: lowest priority, then id.
    pub fn first_by_priority(&self) -> Option<&Candidate> {
        self.candidates.values().min_by(|a, b| a.sort_key().cmp(&b.sort_key()))
    }
}
