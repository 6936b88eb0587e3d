//! Wave compiler.
//!
//! Assigns every phase to exactly one wave:
//!
//! 1. Longest-path layering over predecessor edges: a phase's wave is one
//!    past the latest of its predecessors, or 1. A pinned phase keeps its pin.
//! 2. A sweep over waves in ascending order splits file conflicts: pinned
//!    members are placed first, then unpinned members in declaration order.
//!    An unpinned member whose files overlap an already placed member moves
//!    to the next wave, dragging its dependents along so they stay strictly
//!    later.
//!
//! Conflicts between two pinned phases, or splits that would have to move a
//! pinned phase, are irreducible and fail with `FileConflict`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use super::descriptor::PlanDescriptor;
use super::graph::PhaseGraph;
use super::phase::{Phase, PhaseId, WaveId};
use super::{Plan, Wave};
use crate::error::{Error, Result};
use crate::util::slugify;
use crate::wlog_debug;

/// Validate and compile a descriptor into an immutable plan.
pub fn compile(descriptor: &PlanDescriptor) -> Result<Plan> {
    descriptor.validate()?;

    let mut graph = PhaseGraph::new();
    for decl in &descriptor.phases {
        graph.add_phase(PhaseId(decl.number));
    }
    for decl in &descriptor.phases {
        for &pred in &decl.depends_on {
            graph.add_dependency(PhaseId(pred), PhaseId(decl.number))?;
        }
    }
    let order = graph.topological_order()?;

    let pins: HashMap<PhaseId, u32> = descriptor
        .phases
        .iter()
        .filter_map(|d| d.wave.map(|w| (PhaseId(d.number), w)))
        .collect();
    let files: HashMap<PhaseId, BTreeSet<PathBuf>> = descriptor
        .phases
        .iter()
        .map(|d| {
            let phase = Phase {
                id: PhaseId(d.number),
                name: d.name.clone(),
                wave: WaveId(0),
                tasks: d.tasks.clone(),
                depends_on: Vec::new(),
            };
            (phase.id, phase.files())
        })
        .collect();

    let mut waves = layer(&graph, &order, &pins)?;
    let placed = split_conflicts(&graph, &descriptor_order(descriptor), &pins, &files, &mut waves)?;

    let phases: Vec<Phase> = descriptor
        .phases
        .iter()
        .map(|d| {
            let id = PhaseId(d.number);
            Phase {
                id,
                name: d.name.clone(),
                wave: WaveId(waves[&id]),
                tasks: d.tasks.clone(),
                depends_on: graph.predecessors(id),
            }
        })
        .collect();

    let waves: Vec<Wave> = placed
        .into_iter()
        .map(|(wave, mut members)| {
            members.sort();
            Wave {
                id: WaveId(wave),
                phases: members,
            }
        })
        .collect();

    wlog_debug!(
        "compile plan={} phases={} waves={}",
        descriptor.name,
        phases.len(),
        waves.len()
    );

    Ok(Plan {
        id: slugify(&descriptor.name),
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        phases,
        waves,
        graph,
    })
}

fn descriptor_order(descriptor: &PlanDescriptor) -> HashMap<PhaseId, usize> {
    descriptor
        .phases
        .iter()
        .enumerate()
        .map(|(i, d)| (PhaseId(d.number), i))
        .collect()
}

/// Longest-path layering, honoring pins.
fn layer(
    graph: &PhaseGraph,
    order: &[PhaseId],
    pins: &HashMap<PhaseId, u32>,
) -> Result<HashMap<PhaseId, u32>> {
    let mut waves: HashMap<PhaseId, u32> = HashMap::new();
    for &id in order {
        let required = graph
            .predecessors(id)
            .iter()
            .map(|p| waves[p] + 1)
            .max()
            .unwrap_or(1);
        let wave = match pins.get(&id) {
            Some(&pin) if pin < required => {
                return Err(Error::Validation(format!(
                    "phase {} is pinned to wave {} but its predecessors require wave {} or later",
                    id, pin, required
                )));
            }
            Some(&pin) => pin,
            None => required,
        };
        waves.insert(id, wave);
    }
    Ok(waves)
}

/// Sweep waves in ascending order and push conflicting phases later.
///
/// Returns the final membership of every non-empty wave.
fn split_conflicts(
    graph: &PhaseGraph,
    declared: &HashMap<PhaseId, usize>,
    pins: &HashMap<PhaseId, u32>,
    files: &HashMap<PhaseId, BTreeSet<PathBuf>>,
    waves: &mut HashMap<PhaseId, u32>,
) -> Result<BTreeMap<u32, Vec<PhaseId>>> {
    let mut remaining: BTreeSet<PhaseId> = waves.keys().copied().collect();
    let mut placed: BTreeMap<u32, Vec<PhaseId>> = BTreeMap::new();

    while let Some(current) = remaining.iter().map(|id| waves[id]).min() {
        let mut members: Vec<PhaseId> = remaining
            .iter()
            .copied()
            .filter(|id| waves[id] == current)
            .collect();
        members.sort_by_key(|id| (!pins.contains_key(id), declared[id]));

        let mut kept: Vec<PhaseId> = Vec::new();
        for id in members {
            let clash = kept.iter().find_map(|&other| {
                let overlap: Vec<PathBuf> =
                    files[&other].intersection(&files[&id]).cloned().collect();
                (!overlap.is_empty()).then_some((other, overlap))
            });

            match clash {
                None => kept.push(id),
                Some((other, overlap)) if pins.contains_key(&id) => {
                    return Err(Error::FileConflict {
                        first: other,
                        second: id,
                        wave: WaveId(current),
                        files: overlap,
                    });
                }
                Some((other, overlap)) => {
                    wlog_debug!(
                        "compile: phase {} conflicts with phase {} in wave {}, moving to wave {}",
                        id,
                        other,
                        current,
                        current + 1
                    );
                    waves.insert(id, current + 1);
                    push_dependents(graph, pins, waves, id).map_err(|_| Error::FileConflict {
                        first: other,
                        second: id,
                        wave: WaveId(current),
                        files: overlap,
                    })?;
                }
            }
        }

        for id in &kept {
            remaining.remove(id);
        }
        placed.insert(current, kept);
    }

    Ok(placed)
}

/// Keep every dependent of `moved` strictly later than it.
///
/// Fails with the pinned phase that would have to move.
fn push_dependents(
    graph: &PhaseGraph,
    pins: &HashMap<PhaseId, u32>,
    waves: &mut HashMap<PhaseId, u32>,
    moved: PhaseId,
) -> std::result::Result<(), PhaseId> {
    let mut stack = vec![moved];
    while let Some(id) = stack.pop() {
        let floor = waves[&id] + 1;
        for dependent in graph.dependents(id) {
            if waves[&dependent] < floor {
                if pins.contains_key(&dependent) {
                    return Err(dependent);
                }
                waves.insert(dependent, floor);
                stack.push(dependent);
            }
        }
    }
    Ok(())
}
