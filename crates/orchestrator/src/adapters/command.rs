//! Runs each workflow as a shell command inside its sandbox.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use dispatch_core::{ErrorKind, RunResult};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::adapter::{CancelSignal, ExecutionAdapter, RunSpec};

const STDERR_TAIL_LINES: usize = 5;

/// Maps workflow ids to `sh -c` command lines.
///
/// The command runs with the sandbox as its working directory and sees
/// `WORKFLOW_ID` and `SANDBOX_DIR` in its environment. Every regular file
/// left in the sandbox is reported as a created artifact.
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    shell: String,
    commands: BTreeMap<String, String>,
}

impl Default for CommandAdapter {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            commands: BTreeMap::new(),
        }
    }
}

impl CommandAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_command(mut self, workflow_id: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.insert(workflow_id.into(), command.into());
        self
    }

    pub fn command_for(&self, workflow_id: &str) -> Option<&str> {
        self.commands.get(workflow_id).map(String::as_str)
    }
}

#[async_trait]
impl ExecutionAdapter for CommandAdapter {
    async fn execute(&self, spec: RunSpec, cancel: CancelSignal) -> RunResult {
        let workflow_id = spec.workflow_id.as_str();
        let Some(script) = self.command_for(workflow_id) else {
            return RunResult::failed(
                workflow_id,
                ErrorKind::ExecutionFailed,
                format!("no command configured for workflow '{}'", workflow_id),
            );
        };
        let sandbox = spec.sandbox.path();

        let mut command = Command::new(&self.shell);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(sandbox)
            .arg("-c")
            .arg(script)
            .env("WORKFLOW_ID", workflow_id)
            .env("SANDBOX_DIR", sandbox);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RunResult::failed(
                    workflow_id,
                    ErrorKind::ExecutionFailed,
                    format!("failed to spawn '{}': {}", self.shell, e),
                )
            }
        };
        debug!(workflow_id = %workflow_id, pid = child.id(), "Spawned workflow command");

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output,
            _ = cancel.cancelled() => {
                warn!(workflow_id = %workflow_id, "Workflow command cancelled, killing child");
                return RunResult::failed(workflow_id, ErrorKind::Cancelled, "cancelled before completion");
            }
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return RunResult::failed(
                    workflow_id,
                    ErrorKind::ExecutionFailed,
                    format!("failed to wait for command: {}", e),
                )
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return RunResult::failed(
                workflow_id,
                ErrorKind::ExecutionFailed,
                format!("command exited with {}: {}", code, tail(&stderr, STDERR_TAIL_LINES)),
            );
        }

        let artifacts = match list_files(sandbox).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                return RunResult::failed(
                    workflow_id,
                    ErrorKind::ExecutionFailed,
                    format!("failed to list sandbox: {}", e),
                )
            }
        };

        let result = RunResult::executed(workflow_id, artifacts);
        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().rev().find(|line| !line.trim().is_empty()) {
            Some(line) => result.with_message(line.trim()),
            None => result,
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = kept.len().saturating_sub(lines);
    let joined = kept[start..].join(" | ");
    if joined.is_empty() {
        "no stderr output".to_string()
    } else {
        joined
    }
}

/// Every regular file under `root`, relative with `/` separators, sorted.
async fn list_files(root: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                if let Ok(relative) = path.strip_prefix(root) {
                    let parts: Vec<String> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    files.push(parts.join("/"));
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SandboxHandle;
    use dispatch_core::RunStatus;
    use std::time::Duration;

    async fn spec_in(dir: &Path, workflow_id: &str) -> RunSpec {
        let sandbox = SandboxHandle::for_workflow(dir, "plan-cmd", workflow_id);
        sandbox.prepare(workflow_id).await.unwrap();
        RunSpec {
            workflow_id: workflow_id.to_string(),
            plan_id: "plan-cmd".to_string(),
            sandbox,
        }
    }

    #[tokio::test]
    async fn test_artifacts_listed_relative_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CommandAdapter::new().with_command(
            "digest",
            "mkdir -p out && printf x > out/b.md && printf y > a.md && echo rendered",
        );

        let result = adapter
            .execute(spec_in(dir.path(), "digest").await, CancelSignal::new())
            .await;

        assert_eq!(result.status, RunStatus::Executed);
        assert_eq!(result.created_artifacts, vec!["a.md", "out/b.md"]);
        assert_eq!(result.message.as_deref(), Some("rendered"));
    }

    #[tokio::test]
    async fn test_rerun_reports_only_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CommandAdapter::new().with_command("digest", "printf y > new.md");

        let first = spec_in(dir.path(), "digest").await;
        std::fs::write(first.sandbox.path().join("old.md"), "stale").unwrap();

        let result = adapter
            .execute(spec_in(dir.path(), "digest").await, CancelSignal::new())
            .await;

        assert_eq!(result.status, RunStatus::Executed);
        assert_eq!(result.created_artifacts, vec!["new.md"]);
    }

    #[tokio::test]
    async fn test_environment_exposed() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CommandAdapter::new().with_command("env-check", "printf \"$WORKFLOW_ID\" > id.txt");

        let spec = spec_in(dir.path(), "env-check").await;
        let sandbox = spec.sandbox.path().to_path_buf();
        let result = adapter.execute(spec, CancelSignal::new()).await;

        assert_eq!(result.status, RunStatus::Executed);
        let written = std::fs::read_to_string(sandbox.join("id.txt")).unwrap();
        assert_eq!(written, "env-check");
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CommandAdapter::new().with_command("broken", "echo 'template missing' >&2; exit 3");

        let result = adapter
            .execute(spec_in(dir.path(), "broken").await, CancelSignal::new())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionFailed));
        assert!(result.errors[0].contains("exited with 3"));
        assert!(result.errors[0].contains("template missing"));
    }

    #[tokio::test]
    async fn test_unknown_workflow_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = CommandAdapter::new()
            .execute(spec_in(dir.path(), "ghost").await, CancelSignal::new())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.errors[0].contains("ghost"));
    }

    #[tokio::test]
    async fn test_cancel_kills_command() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CommandAdapter::new().with_command("slow", "sleep 30");
        let spec = spec_in(dir.path(), "slow").await;
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), adapter.execute(spec, cancel))
            .await
            .unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\n\nc\n", 2), "b | c");
        assert_eq!(tail("", 2), "no stderr output");
    }
}
