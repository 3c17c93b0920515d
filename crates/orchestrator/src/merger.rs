//! Reconciliation of per-workflow artifacts into one deliverable manifest.

use std::collections::HashMap;

use dispatch_core::{
    CollisionRecord, ConflictResolution, DeliverableManifest, ManifestEntry, ManifestError,
    Resolution, RunResult, RunStatus,
};
use tracing::{debug, warn};

use crate::stage_orchestrator::StageRun;

/// Decides what happens when `producer` emits a path `claimant` already owns.
pub trait ReconciliationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `is_claimed` reports whether a candidate path is already taken in the
    /// manifest being built.
    fn resolve(
        &self,
        path: &str,
        claimant: &str,
        producer: &str,
        is_claimed: &dyn Fn(&str) -> bool,
    ) -> Resolution;
}

/// Renames the later artifact to `<stem>--<producer>.<ext>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixStrategy;

impl ReconciliationStrategy for SuffixStrategy {
    fn name(&self) -> &'static str {
        ConflictResolution::Suffix.as_str()
    }

    fn resolve(
        &self,
        path: &str,
        _claimant: &str,
        producer: &str,
        is_claimed: &dyn Fn(&str) -> bool,
    ) -> Resolution {
        let mut candidate = suffixed(path, producer);
        let mut n = 2;
        while is_claimed(&candidate) {
            candidate = suffixed(path, &format!("{}-{}", producer, n));
            n += 1;
        }
        Resolution::Renamed { path: candidate }
    }
}

/// Leaves the collision unresolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailStrategy;

impl ReconciliationStrategy for FailStrategy {
    fn name(&self) -> &'static str {
        ConflictResolution::Fail.as_str()
    }

    fn resolve(
        &self,
        _path: &str,
        claimant: &str,
        _producer: &str,
        _is_claimed: &dyn Fn(&str) -> bool,
    ) -> Resolution {
        Resolution::Unresolved {
            reason: format!("path already claimed by '{}'", claimant),
        }
    }
}

/// Insert `--<tag>` before the file extension of the last path component.
fn suffixed(path: &str, tag: &str) -> String {
    let (dir, name) = match path.rfind('/') {
        Some(i) => path.split_at(i + 1),
        None => ("", path),
    };
    match name.rfind('.') {
        Some(i) if i > 0 => format!("{}{}--{}{}", dir, &name[..i], tag, &name[i..]),
        _ => format!("{}{}--{}", dir, name, tag),
    }
}

pub struct ReconciliationMerger {
    strategy: Box<dyn ReconciliationStrategy>,
}

impl Default for ReconciliationMerger {
    fn default() -> Self {
        Self::new(Box::new(SuffixStrategy))
    }
}

impl ReconciliationMerger {
    pub fn new(strategy: Box<dyn ReconciliationStrategy>) -> Self {
        Self { strategy }
    }

    pub fn from_policy(policy: ConflictResolution) -> Self {
        match policy {
            ConflictResolution::Suffix => Self::new(Box::new(SuffixStrategy)),
            ConflictResolution::Fail => Self::new(Box::new(FailStrategy)),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Build the manifest from the stage runs of one plan.
    ///
    /// Producers are walked by stage index, then `workflow_id`, so the first
    /// claimant of a path is the earliest-staged, lexicographically smallest
    /// producer. Skipped and failed results contribute nothing.
    pub fn merge(&self, stage_runs: &[StageRun]) -> DeliverableManifest {
        let mut producers: Vec<(usize, &RunResult)> = stage_runs
            .iter()
            .flat_map(|stage| stage.results.iter().map(move |result| (stage.index, result)))
            .filter(|(_, result)| result.status == RunStatus::Executed)
            .collect();
        producers.sort_by(|(a_stage, a), (b_stage, b)| {
            a_stage.cmp(b_stage).then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });

        let mut manifest = DeliverableManifest::default();
        // path -> index of the owning entry
        let mut claimed: HashMap<String, usize> = HashMap::new();

        for (_, result) in producers {
            for artifact in &result.created_artifacts {
                let Some(&owner_idx) = claimed.get(artifact) else {
                    claimed.insert(artifact.clone(), manifest.entries.len());
                    manifest.entries.push(ManifestEntry {
                        path: artifact.clone(),
                        workflow_id: result.workflow_id.clone(),
                        original_path: artifact.clone(),
                        unresolved: false,
                    });
                    continue;
                };

                let claimant = manifest.entries[owner_idx].workflow_id.clone();
                if claimant == result.workflow_id {
                    debug!(workflow_id = %claimant, path = %artifact, "Duplicate artifact within one workflow");
                    continue;
                }

                let resolution = self.strategy.resolve(
                    artifact,
                    &claimant,
                    &result.workflow_id,
                    &|path| claimed.contains_key(path),
                );

                match &resolution {
                    Resolution::Renamed { path } => {
                        warn!(
                            path = %artifact,
                            claimant = %claimant,
                            producer = %result.workflow_id,
                            renamed = %path,
                            "Artifact collision resolved by rename"
                        );
                        claimed.insert(path.clone(), manifest.entries.len());
                        manifest.entries.push(ManifestEntry {
                            path: path.clone(),
                            workflow_id: result.workflow_id.clone(),
                            original_path: artifact.clone(),
                            unresolved: false,
                        });
                    }
                    Resolution::Unresolved { reason } => {
                        warn!(
                            path = %artifact,
                            claimant = %claimant,
                            producer = %result.workflow_id,
                            strategy = self.strategy.name(),
                            "Artifact collision left unresolved"
                        );
                        manifest.entries[owner_idx].unresolved = true;
                        manifest.entries.push(ManifestEntry {
                            path: artifact.clone(),
                            workflow_id: result.workflow_id.clone(),
                            original_path: artifact.clone(),
                            unresolved: true,
                        });
                        manifest.errors.push(ManifestError::unresolvable(
                            result.workflow_id.as_str(),
                            format!("artifact collision on '{}': {}", artifact, reason),
                        ));
                    }
                }

                manifest.collisions.push(CollisionRecord {
                    path: artifact.clone(),
                    claimant,
                    producer: result.workflow_id.clone(),
                    resolution,
                });
            }
        }

        manifest
    }
}
