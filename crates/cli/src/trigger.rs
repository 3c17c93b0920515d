use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use dispatch_core::Candidate;
use orchestrator::CommandAdapter;
use serde::{Deserialize, Serialize};

/// One trigger and the workflows it matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerFile {
    pub trigger: String,
    #[serde(default)]
    pub workflows: Vec<WorkflowEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEntry {
    pub id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conflict_keys: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Shell command run by `wfdispatch run`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl TriggerFile {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read trigger file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse trigger file {}", path.display()))
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.workflows
            .iter()
            .map(|entry| Candidate {
                id: entry.id.clone(),
                priority: entry.priority,
                conflict_keys: entry.conflict_keys.clone(),
                dependencies: entry.dependencies.clone(),
            })
            .collect()
    }

    pub fn adapter(&self) -> CommandAdapter {
        self.workflows
            .iter()
            .filter_map(|entry| entry.command.as_ref().map(|cmd| (entry.id.as_str(), cmd.as_str())))
            .fold(CommandAdapter::new(), |adapter, (id, cmd)| adapter.with_command(id, cmd))
    }

    /// Written by `wfdispatch init` as a starting point.
    pub fn example() -> Self {
        let weekly = "deliverable:weekly-report".to_string();
        Self {
            trigger: "issue-17".to_string(),
            workflows: vec![
                WorkflowEntry {
                    id: "compliance-advisory".to_string(),
                    priority: 1,
                    conflict_keys: BTreeSet::from([weekly.clone()]),
                    dependencies: BTreeSet::new(),
                    command: Some("echo advisory > report.md".to_string()),
                },
                WorkflowEntry {
                    id: "policy-overview".to_string(),
                    priority: 1,
                    conflict_keys: BTreeSet::new(),
                    dependencies: BTreeSet::new(),
                    command: Some("echo overview > report.md".to_string()),
                },
                WorkflowEntry {
                    id: "enforcement-snapshot".to_string(),
                    priority: 2,
                    conflict_keys: BTreeSet::from([weekly]),
                    dependencies: BTreeSet::from(["compliance-advisory".to_string()]),
                    command: Some("echo snapshot > snapshot.md".to_string()),
                },
            ],
        }
    }
}
