//! Phase execution capability.
//!
//! The coordinator knows nothing about what a phase does. It hands each
//! phase to a `PhaseExecutor`, which runs all of the phase's tasks in a
//! fresh context and reports a single outcome.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::{Config, DEFAULT_SHELL};
use crate::plan::{Phase, TaskKind};
use crate::{wlog_debug, wlog_trace};

/// Result of executing one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Done,
    Failed { reason: String },
}

impl PhaseOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

}

impl std::fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseOutcome::Done => write!(f, "done"),
            PhaseOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Run every task of `phase` in an isolated context.
    async fn execute(&self, phase: &Phase) -> PhaseOutcome;

    /// Report the outcome of a phase that was still running when the
    /// previous process stopped. `None` means unknown, which resumes as failed.
    async fn recover(&self, _phase: &Phase) -> Option<PhaseOutcome> {
        None
    }
}

/// Executes each task's verification predicate as a shell command.
///
/// A task passes when its `verify` command exits with status 0; tasks with
/// no predicate pass trivially. Checkpoint tasks need confirmation, which
/// `trust` grants up front.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    workdir: PathBuf,
    trust: bool,
}

impl ShellExecutor {
    pub fn new(workdir: &Path) -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            workdir: workdir.to_path_buf(),
            trust: false,
        }
    }

    pub fn from_config(config: &Config, workdir: &Path) -> Self {
        Self {
            shell: config.effective_shell().to_string(),
            workdir: workdir.to_path_buf(),
            trust: config.trust,
        }
    }

    pub fn with_shell(mut self, shell: &str) -> Self {
        self.shell = shell.to_string();
        self
    }

    pub fn with_trust(mut self, trust: bool) -> Self {
        self.trust = trust;
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_available(&self) -> bool {
        which::which(&self.shell).is_ok()
    }
}

#[async_trait]
impl PhaseExecutor for ShellExecutor {
    async fn execute(&self, phase: &Phase) -> PhaseOutcome {
        if !self.is_available() {
            return PhaseOutcome::failed(format!("shell '{}' not found", self.shell));
        }

        for task in &phase.tasks {
            if task.kind == TaskKind::Checkpoint && !self.trust {
                return PhaseOutcome::failed(format!(
                    "task '{}' awaits confirmation",
                    task.name
                ));
            }
            if task.verify.trim().is_empty() {
                continue;
            }

            wlog_debug!(
                "ShellExecutor: phase {} task '{}' verify: {}",
                phase.id,
                task.name,
                task.verify
            );
            let mut command = Command::new(&self.shell);
            command
                .arg("-c")
                .arg(&task.verify)
                .current_dir(&self.workdir)
                .env("WAVEPLAN_PHASE", phase.id.to_string())
                .env("WAVEPLAN_TASK", &task.name)
                // A timed-out phase drops this future; its shell must not outlive it.
                .kill_on_drop(true);
            // Keep terminal signals (Ctrl-C) away from in-flight phases.
            #[cfg(unix)]
            command.process_group(0);
            let output = command.output().await;

            let output = match output {
                Ok(output) => output,
                Err(e) => {
                    return PhaseOutcome::failed(format!(
                        "task '{}' could not start: {}",
                        task.name, e
                    ));
                }
            };
            wlog_trace!(
                "ShellExecutor: task '{}' stdout: {}",
                task.name,
                String::from_utf8_lossy(&output.stdout).trim()
            );

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let code = output.status.code().unwrap_or(-1);
                let mut reason = format!(
                    "task '{}' verification failed (exit code {})",
                    task.name, code
                );
                if !stderr.trim().is_empty() {
                    reason.push_str(": ");
                    reason.push_str(stderr.trim());
                }
                return PhaseOutcome::failed(reason);
            }
        }

        PhaseOutcome::Done
    }
}
