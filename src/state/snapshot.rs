//! The live state record of a plan: phase statuses plus the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::plan::{Plan, PhaseId, PhaseStatus};

pub const STATE_VERSION: u32 = 1;

/// Identifier of one coordinator run, recorded on every event it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub phase: PhaseId,
    pub to: PhaseStatus,
    pub detail: Option<String>,
    pub run: Option<RunId>,
}

impl Transition {
    pub fn new(phase: PhaseId, to: PhaseStatus) -> Self {
        Self {
            phase,
            to,
            detail: None,
            run: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn in_run(mut self, run: RunId) -> Self {
        self.run = Some(run);
        self
    }
}

/// One append-only log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub timestamp: DateTime<Utc>,
    pub phase: PhaseId,
    pub old_status: PhaseStatus,
    pub new_status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunId>,
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} phase {}: {} -> {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.phase,
            self.old_status,
            self.new_status
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Timestamped record of phase statuses plus the event log.
///
/// Phases missing from `statuses` are pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    /// Id of the plan this snapshot belongs to.
    pub plan: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    statuses: BTreeMap<PhaseId, PhaseStatus>,
    #[serde(default)]
    events: Vec<StateEvent>,
}

impl StateSnapshot {
    pub fn new(plan: &str) -> Self {
        Self {
            version: STATE_VERSION,
            plan: plan.to_string(),
            updated_at: Utc::now(),
            statuses: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn status(&self, phase: PhaseId) -> PhaseStatus {
        self.statuses.get(&phase).copied().unwrap_or_default()
    }

    /// Explicitly recorded statuses, ascending by phase.
    pub fn statuses(&self) -> impl Iterator<Item = (PhaseId, PhaseStatus)> + '_ {
        self.statuses.iter().map(|(id, status)| (*id, *status))
    }

    pub fn events(&self) -> &[StateEvent] {
        &self.events
    }

    /// Most recent detail recorded for a phase, e.g. a failure reason.
    pub fn last_detail(&self, phase: PhaseId) -> Option<&str> {
        self.events
            .iter()
            .rev()
            .find(|e| e.phase == phase)
            .and_then(|e| e.detail.as_deref())
    }

    /// Plan phases currently in `status`, ascending.
    pub fn phases_with(&self, plan: &Plan, status: PhaseStatus) -> Vec<PhaseId> {
        plan.phases()
            .iter()
            .map(|p| p.id)
            .filter(|id| self.status(*id) == status)
            .collect()
    }

    /// Recorded phase ids that the plan does not declare.
    pub fn unknown_phases(&self, plan: &Plan) -> Vec<PhaseId> {
        self.statuses
            .keys()
            .chain(self.events.iter().map(|e| &e.phase))
            .filter(|id| !plan.contains(**id))
            .copied()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Apply a forward transition and log it.
    pub fn apply(&mut self, transition: &Transition) -> Result<()> {
        let from = self.status(transition.phase);
        if !from.can_transition_to(transition.to) {
            return Err(Error::InvalidStatusTransition {
                phase: transition.phase,
                from,
                to: transition.to,
            });
        }
        self.record(from, transition);
        Ok(())
    }

    /// Put a phase back to pending so it can be dispatched again.
    ///
    /// Resetting a pending phase is a no-op and logs nothing.
    pub fn apply_reset(&mut self, transition: &Transition) -> Result<()> {
        let from = self.status(transition.phase);
        if transition.to != PhaseStatus::Pending {
            return Err(Error::InvalidStatusTransition {
                phase: transition.phase,
                from,
                to: transition.to,
            });
        }
        if from != PhaseStatus::Pending {
            self.record(from, transition);
        }
        Ok(())
    }

    fn record(&mut self, from: PhaseStatus, transition: &Transition) {
        let now = Utc::now();
        if transition.to == PhaseStatus::Pending {
            self.statuses.remove(&transition.phase);
        } else {
            self.statuses.insert(transition.phase, transition.to);
        }
        self.events.push(StateEvent {
            timestamp: now,
            phase: transition.phase,
            old_status: from,
            new_status: transition.to,
            detail: transition.detail.clone(),
            run: transition.run,
        });
        self.updated_at = now;
    }
}
