//! Plan descriptors: the persisted, uncompiled form of a plan.
//!
//! Descriptors are TOML by default, or JSON when the file ends in `.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::phase::Task;
use crate::{wlog_debug, Error, Result};

/// Feature description plus ordered phase declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phases: Vec<PhaseDecl>,
}

/// A phase as declared, before wave assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDecl {
    pub number: u32,
    pub name: String,
    /// Predecessor phase numbers.
    #[serde(default)]
    pub depends_on: Vec<u32>,
    /// Explicit wave pin. The compiler never moves a pinned phase.
    #[serde(default)]
    pub wave: Option<u32>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl PhaseDecl {
    pub fn new(number: u32, name: &str) -> Self {
        Self {
            number,
            name: name.to_string(),
            depends_on: Vec::new(),
            wave: None,
            tasks: Vec::new(),
        }
    }

    pub fn after(mut self, predecessors: &[u32]) -> Self {
        self.depends_on = predecessors.to_vec();
        self
    }

    pub fn pinned(mut self, wave: u32) -> Self {
        self.wave = Some(wave);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }
}

impl PlanDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            phases: Vec::new(),
        }
    }

    pub fn phase(mut self, phase: PhaseDecl) -> Self {
        self.phases.push(phase);
        self
    }

    /// Read a descriptor from disk, choosing the format by extension.
    pub fn load(path: &Path) -> Result<Self> {
        wlog_debug!("PlanDescriptor::load path={}", path.display());
        let contents = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_toml(&contents)
        }
    }

    /// Parse TOML. Missing or mistyped fields are validation errors.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::Validation(format!("invalid plan descriptor: {}", e.message())))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| Error::Validation(format!("invalid plan descriptor: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Structural checks that need no graph analysis.
    ///
    /// Cycles, wave pins and file conflicts are checked by the compiler.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("plan name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        let mut previous: Option<u32> = None;
        for phase in &self.phases {
            if phase.number == 0 {
                return Err(Error::Validation(format!(
                    "phase '{}' has number 0; phase numbers start at 1",
                    phase.name
                )));
            }
            if !seen.insert(phase.number) {
                return Err(Error::Validation(format!(
                    "duplicate phase number {}",
                    phase.number
                )));
            }
            if let Some(prev) = previous {
                if phase.number < prev {
                    return Err(Error::Validation(format!(
                        "phase {} is declared after phase {}; numbers must increase",
                        phase.number, prev
                    )));
                }
            }
            previous = Some(phase.number);

            if phase.name.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "phase {} has an empty name",
                    phase.number
                )));
            }
            if phase.tasks.is_empty() {
                return Err(Error::Validation(format!(
                    "phase {} has no tasks",
                    phase.number
                )));
            }
            if let Some(task) = phase.tasks.iter().find(|t| t.name.trim().is_empty()) {
                return Err(Error::Validation(format!(
                    "phase {} has a task with an empty name (action: '{}')",
                    phase.number, task.action
                )));
            }
            if phase.wave == Some(0) {
                return Err(Error::Validation(format!(
                    "phase {} is pinned to wave 0; waves start at 1",
                    phase.number
                )));
            }
        }

        for phase in &self.phases {
            if let Some(missing) = phase.depends_on.iter().find(|d| !seen.contains(d)) {
                return Err(Error::Validation(format!(
                    "phase {} depends on undeclared phase {}",
                    phase.number, missing
                )));
            }
        }

        Ok(())
    }
}
