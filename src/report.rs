//! Read-side progress queries over a plan and its state snapshot.

use crate::plan::{Phase, PhaseStatus, Plan, WaveId};
use crate::state::StateSnapshot;

/// Progress view of one snapshot. Never mutates anything.
pub struct Progress<'a> {
    plan: &'a Plan,
    snapshot: &'a StateSnapshot,
}

impl<'a> Progress<'a> {
    pub fn new(plan: &'a Plan, snapshot: &'a StateSnapshot) -> Self {
        Self { plan, snapshot }
    }

    pub fn done_count(&self) -> usize {
        self.count(PhaseStatus::Done)
    }

    pub fn total(&self) -> usize {
        self.plan.len()
    }

    /// Done phases over all phases, as a percentage rounded to one decimal.
    /// An empty plan is complete.
    pub fn percent_complete(&self) -> f64 {
        if self.plan.is_empty() {
            return 100.0;
        }
        let raw = self.done_count() as f64 / self.total() as f64 * 100.0;
        (raw * 10.0).round() / 10.0
    }

    /// Lowest wave with a phase that is not terminal; `None` once the plan
    /// has nothing left to run.
    pub fn current_wave(&self) -> Option<WaveId> {
        self.plan
            .waves()
            .iter()
            .find(|w| {
                w.phases
                    .iter()
                    .any(|id| !self.snapshot.status(*id).is_terminal())
            })
            .map(|w| w.id)
    }

    /// Lowest-numbered pending phase of the current wave.
    pub fn next_pending_phase(&self) -> Option<&'a Phase> {
        let wave = self.plan.wave(self.current_wave()?)?;
        wave.phases
            .iter()
            .find(|id| self.snapshot.status(**id) == PhaseStatus::Pending)
            .and_then(|id| self.plan.phase(*id))
    }

    /// Blocked phases in phase-number order.
    pub fn blocked_phases(&self) -> Vec<&'a Phase> {
        self.plan
            .phases()
            .iter()
            .filter(|p| self.snapshot.status(p.id) == PhaseStatus::Blocked)
            .collect()
    }

    /// Nothing left to run, whether or not every phase is done.
    pub fn is_finished(&self) -> bool {
        self.current_wave().is_none()
    }

    /// Human-facing report.
    ///
    /// ```text
    /// ## Progress: Auth Feature
    /// Phases: 5/8 complete (62.5%)
    /// Current wave: 3
    /// Next phase: Phase 6 - Session tokens
    /// Blocked: None
    /// ```
    pub fn render(&self, title: &str) -> String {
        let wave = match self.current_wave() {
            Some(id) => id.to_string(),
            None => "complete".to_string(),
        };
        let next = match self.next_pending_phase() {
            Some(phase) => phase.label(),
            None => "None".to_string(),
        };
        let blocked = self.blocked_phases();
        let blocked = if blocked.is_empty() {
            "None".to_string()
        } else {
            blocked
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "## {}: {}\nPhases: {}/{} complete ({:.1}%)\nCurrent wave: {}\nNext phase: {}\nBlocked: {}\n",
            title,
            self.plan.name(),
            self.done_count(),
            self.total(),
            self.percent_complete(),
            wave,
            next,
            blocked
        )
    }

    fn count(&self, status: PhaseStatus) -> usize {
        self.plan
            .phases()
            .iter()
            .filter(|p| self.snapshot.status(p.id) == status)
            .count()
    }
}
