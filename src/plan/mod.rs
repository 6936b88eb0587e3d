//! Plan model: phases, tasks, waves and the compiler that produces them.
//!
//! A `Plan` is built once by [`compile`] and never changes structurally
//! afterwards. Phase statuses are not stored here; they live in the
//! [`StateSnapshot`](crate::state::StateSnapshot).

pub mod compiler;
pub mod descriptor;
pub mod graph;
pub mod phase;

use std::collections::BTreeSet;
use std::path::Path;

pub use compiler::compile;
pub use descriptor::{PhaseDecl, PlanDescriptor};
pub use graph::PhaseGraph;
pub use phase::{Phase, PhaseId, PhaseStatus, Task, TaskKind, WaveId};

use crate::Result;

/// Phases eligible for concurrent dispatch. Members have disjoint file sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub id: WaveId,
    /// Member phases, ascending by phase number.
    pub phases: Vec<PhaseId>,
}

/// A compiled plan.
#[derive(Debug)]
pub struct Plan {
    id: String,
    name: String,
    description: String,
    phases: Vec<Phase>,
    waves: Vec<Wave>,
    graph: PhaseGraph,
}

impl Plan {
    /// Load a descriptor from disk and compile it.
    pub fn load(path: &Path) -> Result<Self> {
        compile(&PlanDescriptor::load(path)?)
    }

    /// Stable identifier derived from the plan name.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// All phases in phase-number order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Non-empty waves in ascending order.
    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }

    pub fn phase(&self, id: PhaseId) -> Option<&Phase> {
        self.phases
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|i| &self.phases[i])
    }

    pub fn contains(&self, id: PhaseId) -> bool {
        self.phase(id).is_some()
    }

    pub fn wave(&self, id: WaveId) -> Option<&Wave> {
        self.waves.iter().find(|w| w.id == id)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Phases that declared `id` as a predecessor.
    pub fn dependents(&self, id: PhaseId) -> Vec<PhaseId> {
        self.graph.dependents(id)
    }

    /// Phases that transitively depend on `id`.
    pub fn descendants(&self, id: PhaseId) -> BTreeSet<PhaseId> {
        self.graph.descendants(id)
    }
}
