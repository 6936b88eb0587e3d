//! Predecessor graph over phases.
//!
//! Nodes are phase ids and an edge `a -> b` means `b` declared `a` as a
//! predecessor. Backed by petgraph's `DiGraph`.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

use super::phase::PhaseId;
use crate::error::{Error, Result};

pub struct PhaseGraph {
    graph: DiGraph<PhaseId, ()>,
    index: HashMap<PhaseId, NodeIndex>,
}

impl PhaseGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a phase node. Adding an existing phase returns its index.
    pub fn add_phase(&mut self, id: PhaseId) -> NodeIndex {
        if let Some(&index) = self.index.get(&id) {
            return index;
        }
        let index = self.graph.add_node(id);
        self.index.insert(id, index);
        index
    }

    /// Record that `to` depends on `from`.
    ///
    /// Cycles are not rejected here; `topological_order` reports them once
    /// the whole graph is known.
    pub fn add_dependency(&mut self, from: PhaseId, to: PhaseId) -> Result<()> {
        let from_index = *self
            .index
            .get(&from)
            .ok_or(Error::PhaseNotFound(from))?;
        let to_index = *self.index.get(&to).ok_or(Error::PhaseNotFound(to))?;
        if self.graph.find_edge(from_index, to_index).is_none() {
            self.graph.add_edge(from_index, to_index, ());
        }
        Ok(())
    }

    pub fn phase_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct predecessors, ascending.
    pub fn predecessors(&self, id: PhaseId) -> Vec<PhaseId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents, ascending.
    pub fn dependents(&self, id: PhaseId) -> Vec<PhaseId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Every phase reachable through dependent edges, excluding `id` itself.
    pub fn descendants(&self, id: PhaseId) -> BTreeSet<PhaseId> {
        let mut found = BTreeSet::new();
        if let Some(&start) = self.index.get(&id) {
            let mut dfs = Dfs::new(&self.graph, start);
            while let Some(node) = dfs.next(&self.graph) {
                if node != start {
                    found.insert(self.graph[node]);
                }
            }
        }
        found
    }

    /// Phases ordered so every phase follows its predecessors.
    ///
    /// Fails with `DependencyCycle` naming a phase on the cycle.
    pub fn topological_order(&self) -> Result<Vec<PhaseId>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| Error::DependencyCycle {
            phase: self.graph[cycle.node_id()],
        })?;
        Ok(sorted.into_iter().map(|index| self.graph[index]).collect())
    }

    fn neighbors(&self, id: PhaseId, direction: Direction) -> Vec<PhaseId> {
        let mut ids: Vec<PhaseId> = match self.index.get(&id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, direction)
                .map(|n| self.graph[n])
                .collect(),
            None => Vec::new(),
        };
        ids.sort();
        ids
    }
}

impl Default for PhaseGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PhaseGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseGraph")
            .field("phases", &self.phase_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
