//! Phase and task data model.
//!
//! A phase is the unit of execution: all of its tasks run inside one
//! isolated execution context and succeed or fail together. Tasks are only
//! the unit of file-conflict detection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Phase number, unique and strictly increasing within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(pub u32);

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PhaseId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Wave number. Waves run in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaveId(pub u32);

impl std::fmt::Display for WaveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phase status in its lifecycle.
///
/// Transitions are monotonic: pending -> running -> {done, blocked, failed},
/// plus pending -> blocked for phases whose predecessor failed before they
/// were ever dispatched. Nothing leaves a terminal status except an explicit
/// reset by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Done,
    Blocked,
    Failed,
}

impl PhaseStatus {
    /// Done, blocked and failed are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Done | PhaseStatus::Blocked | PhaseStatus::Failed
        )
    }

    /// Check whether the forward transition to `target` is allowed.
    pub fn can_transition_to(&self, target: PhaseStatus) -> bool {
        matches!(
            (self, target),
            (PhaseStatus::Pending, PhaseStatus::Running)
                | (PhaseStatus::Pending, PhaseStatus::Blocked)
                | (PhaseStatus::Running, PhaseStatus::Done)
                | (PhaseStatus::Running, PhaseStatus::Blocked)
                | (PhaseStatus::Running, PhaseStatus::Failed)
        )
    }

    /// Failed or blocked: the phase did not and will not produce its output
    /// without an explicit reset.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, PhaseStatus::Blocked | PhaseStatus::Failed)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "pending"),
            PhaseStatus::Running => write!(f, "running"),
            PhaseStatus::Done => write!(f, "done"),
            PhaseStatus::Blocked => write!(f, "blocked"),
            PhaseStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Whether a task runs unattended or needs someone to confirm it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Auto,
    Checkpoint,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Auto => write!(f, "auto"),
            TaskKind::Checkpoint => write!(f, "checkpoint"),
        }
    }
}

/// Smallest declared unit of work inside a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub kind: TaskKind,
    /// Files this task writes.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// What the task does.
    #[serde(default)]
    pub action: String,
    /// Verification predicate, executed externally.
    #[serde(default)]
    pub verify: String,
    /// Completion criterion.
    #[serde(default)]
    pub done: String,
}

impl Task {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TaskKind::Auto,
            files: Vec::new(),
            action: String::new(),
            verify: String::new(),
            done: String::new(),
        }
    }

    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_verify(mut self, verify: &str) -> Self {
        self.verify = verify.to_string();
        self
    }
}

/// A compiled phase. Immutable once the plan is compiled; its status lives
/// in the state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: PhaseId,
    pub name: String,
    pub wave: WaveId,
    pub tasks: Vec<Task>,
    /// Declared predecessors, ascending.
    pub depends_on: Vec<PhaseId>,
}

impl Phase {
    /// Union of the normalized file-touch sets of all tasks.
    pub fn files(&self) -> BTreeSet<PathBuf> {
        self.tasks
            .iter()
            .flat_map(|t| t.files.iter())
            .map(|f| normalize_path(f))
            .collect()
    }

    /// "Phase <n> - <name>", as shown in reports.
    pub fn label(&self) -> String {
        format!("Phase {} - {}", self.id, self.name)
    }
}

/// Drop `.` components so `./src/a.rs` and `src/a.rs` compare equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
