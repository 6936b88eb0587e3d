use std::path::PathBuf;

use thiserror::Error;

use crate::plan::{PhaseId, PhaseStatus, WaveId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dependency cycle detected at phase {phase}")]
    DependencyCycle { phase: PhaseId },

    #[error("File conflict between phase {first} and phase {second} in wave {wave}: {}", display_files(.files))]
    FileConflict {
        first: PhaseId,
        second: PhaseId,
        wave: WaveId,
        files: Vec<PathBuf>,
    },

    #[error("Resume conflict: state references phases absent from the plan: {}", display_phases(.phases))]
    ResumeConflict { phases: Vec<PhaseId> },

    #[error("State belongs to plan '{found}', expected '{expected}'")]
    PlanMismatch { expected: String, found: String },

    #[error("Invalid status transition for phase {phase} from {from} to {to}")]
    InvalidStatusTransition {
        phase: PhaseId,
        from: PhaseStatus,
        to: PhaseStatus,
    },

    #[error("Phase not found: {0}")]
    PhaseNotFound(PhaseId),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

fn display_files(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_phases(phases: &[PhaseId]) -> String {
    phases
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
