//! Execution coordinator.
//!
//! Drives a compiled plan wave by wave. All runnable phases of a wave are
//! dispatched concurrently (bounded by `max_parallel`), each as its own
//! tokio task holding a private copy of its phase. Results come back through
//! a `JoinSet` and are committed to the state store one by one as they
//! arrive, so commit order is completion order. The next wave starts only
//! after every dispatched phase of the current one is terminal.
//!
//! Resume rule: the coordinator trusts nothing but the loaded snapshot.
//! Done phases are skipped. A phase recorded as `running` belonged to a
//! process that no longer exists; unless the executor's `recover` reports an
//! outcome for it, it is committed as failed with [`INTERRUPTED_REASON`] and
//! its dependents are blocked like after any other failure.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::executor::{PhaseExecutor, PhaseOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::plan::{Phase, PhaseId, PhaseStatus, Plan, Wave, WaveId};
use crate::state::{RunId, StateSnapshot, StateStore, Transition};
use crate::{wlog, wlog_debug, wlog_warn};

/// Failure reason recorded for phases found `running` on resume.
pub const INTERRUPTED_REASON: &str = "interrupted: execution context lost on restart";

/// Failure reason recorded when a phase exceeds the configured timeout.
pub const TIMEOUT_REASON: &str = "timeout";

/// Coordinator tuning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorConfig {
    /// Concurrent phases per wave; `None` dispatches the whole wave at once.
    pub max_parallel: Option<usize>,
    pub phase_timeout: Option<Duration>,
}

impl CoordinatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_parallel: config.max_parallel,
            phase_timeout: config.phase_timeout(),
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel.max(1));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = Some(timeout);
        self
    }

    fn slots(&self) -> usize {
        self.max_parallel.unwrap_or(usize::MAX).max(1)
    }
}

/// Events emitted while a plan runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    WaveStarted {
        wave: WaveId,
        phases: Vec<PhaseId>,
    },
    PhaseStarted {
        phase: PhaseId,
    },
    PhaseCompleted {
        phase: PhaseId,
    },
    PhaseFailed {
        phase: PhaseId,
        reason: String,
    },
    /// A phase was blocked because `cause` failed or was blocked.
    PhaseBlocked {
        phase: PhaseId,
        cause: PhaseId,
    },
    WaveFinished {
        wave: WaveId,
    },
    RunFinished {
        outcome: RunOutcome,
    },
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every phase is done.
    Complete,
    /// At least one phase failed, is blocked, or could not be reached.
    Degraded,
    /// Dispatch stopped by cancellation; undispatched phases stay pending.
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Complete => write!(f, "complete"),
            RunOutcome::Degraded => write!(f, "degraded"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final status of a run. Phase failures are reported here, never as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub plan: String,
    pub run: RunId,
    pub outcome: RunOutcome,
    pub done: Vec<PhaseId>,
    /// Failed phases with their recorded reason.
    pub failed: Vec<(PhaseId, String)>,
    pub blocked: Vec<PhaseId>,
    pub pending: Vec<PhaseId>,
}

impl RunReport {
    fn from_snapshot(plan: &Plan, snapshot: &StateSnapshot, run: RunId, cancelled: bool) -> Self {
        let failed: Vec<(PhaseId, String)> = snapshot
            .phases_with(plan, PhaseStatus::Failed)
            .into_iter()
            .map(|id| {
                let reason = snapshot.last_detail(id).unwrap_or("unknown").to_string();
                (id, reason)
            })
            .collect();
        let done = snapshot.phases_with(plan, PhaseStatus::Done);
        let blocked = snapshot.phases_with(plan, PhaseStatus::Blocked);
        let pending = snapshot.phases_with(plan, PhaseStatus::Pending);

        let outcome = if cancelled && !pending.is_empty() {
            RunOutcome::Cancelled
        } else if done.len() == plan.len() {
            RunOutcome::Complete
        } else {
            RunOutcome::Degraded
        };

        Self {
            plan: plan.name().to_string(),
            run,
            outcome,
            done,
            failed,
            blocked,
            pending,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Complete
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Run {} of {}: {}",
            self.run.short(),
            self.plan,
            self.outcome
        )?;
        writeln!(f, "Done: {}", self.done.len())?;
        for (id, reason) in &self.failed {
            writeln!(f, "Failed: phase {} ({})", id, reason)?;
        }
        if !self.blocked.is_empty() {
            writeln!(f, "Blocked: {}", join_ids(&self.blocked))?;
        }
        if !self.pending.is_empty() {
            writeln!(f, "Pending: {}", join_ids(&self.pending))?;
        }
        Ok(())
    }
}

fn join_ids(ids: &[PhaseId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drives compiled plans against a state store.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use waveplan::orchestration::{Coordinator, CoordinatorConfig, ShellExecutor};
/// use waveplan::state::FileStore;
///
/// let store = Arc::new(FileStore::new(&state_path, plan.id()));
/// let coordinator = Coordinator::new(store, CoordinatorConfig::default());
/// let executor = Arc::new(ShellExecutor::new(&workdir));
/// let report = coordinator.run(&plan, executor, CancellationToken::new()).await?;
/// ```
pub struct Coordinator {
    store: Arc<dyn StateStore>,
    config: CoordinatorConfig,
    event_tx: Option<mpsc::Sender<CoordinatorEvent>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn StateStore>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            event_tx: None,
        }
    }

    /// Emit lifecycle events on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<CoordinatorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run `plan` to a terminal state, or until `cancel` fires.
    ///
    /// Returns `Err` only for resume conflicts and store failures.
    pub async fn run(
        &self,
        plan: &Plan,
        executor: Arc<dyn PhaseExecutor>,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let run = RunId::new();
        let mut snapshot = self.store.load().await?;

        let unknown = snapshot.unknown_phases(plan);
        if !unknown.is_empty() {
            return Err(Error::ResumeConflict { phases: unknown });
        }

        wlog!(
            "run {} plan={} phases={} waves={}",
            run.short(),
            plan.name(),
            plan.len(),
            plan.waves().len()
        );

        snapshot = self
            .recover_interrupted(plan, executor.as_ref(), run, snapshot)
            .await?;
        snapshot = self.reconsider_blocked(plan, run, snapshot).await?;

        for wave in plan.waves() {
            if cancel.is_cancelled() {
                wlog!("run {} cancelled before wave {}", run.short(), wave.id);
                break;
            }

            let (runnable, next) = self.prepare_wave(plan, wave, run, snapshot).await?;
            snapshot = next;
            if runnable.is_empty() {
                continue;
            }

            wlog!(
                "wave {}: dispatching {} of {} phases",
                wave.id,
                runnable.len(),
                wave.phases.len()
            );
            self.emit(CoordinatorEvent::WaveStarted {
                wave: wave.id,
                phases: runnable.clone(),
            })
            .await;

            snapshot = self
                .dispatch_wave(plan, runnable, &executor, &cancel, run, snapshot)
                .await?;

            self.emit(CoordinatorEvent::WaveFinished { wave: wave.id }).await;
        }

        let report = RunReport::from_snapshot(plan, &snapshot, run, cancel.is_cancelled());
        wlog!(
            "run {} finished: {} (done={}, failed={}, blocked={}, pending={})",
            run.short(),
            report.outcome,
            report.done.len(),
            report.failed.len(),
            report.blocked.len(),
            report.pending.len()
        );
        self.emit(CoordinatorEvent::RunFinished {
            outcome: report.outcome,
        })
        .await;
        Ok(report)
    }

    /// Reset a phase to pending so the next `run` dispatches it again.
    ///
    /// Blocked dependents are reconsidered at the start of that run.
    pub async fn retry(&self, plan: &Plan, phase: PhaseId) -> Result<StateSnapshot> {
        if !plan.contains(phase) {
            return Err(Error::PhaseNotFound(phase));
        }
        let snapshot = self.store.load().await?;
        let unknown = snapshot.unknown_phases(plan);
        if !unknown.is_empty() {
            return Err(Error::ResumeConflict { phases: unknown });
        }
        wlog!("retry: resetting phase {} ({})", phase, snapshot.status(phase));
        self.store
            .reset(Transition::new(phase, PhaseStatus::Pending).with_detail("reset for retry"))
            .await
    }

    /// Settle phases left `running` by a previous process.
    async fn recover_interrupted(
        &self,
        plan: &Plan,
        executor: &dyn PhaseExecutor,
        run: RunId,
        mut snapshot: StateSnapshot,
    ) -> Result<StateSnapshot> {
        for id in snapshot.phases_with(plan, PhaseStatus::Running) {
            let phase = plan.phase(id).ok_or(Error::PhaseNotFound(id))?;
            let outcome = executor
                .recover(phase)
                .await
                .unwrap_or_else(|| PhaseOutcome::failed(INTERRUPTED_REASON));
            wlog_warn!("resume: phase {} was running, now {}", id, outcome);
            snapshot = self.record_outcome(plan, id, outcome, run).await?;
        }
        Ok(snapshot)
    }

    /// Unblock phases none of whose predecessors failed or are blocked any more.
    async fn reconsider_blocked(
        &self,
        plan: &Plan,
        run: RunId,
        mut snapshot: StateSnapshot,
    ) -> Result<StateSnapshot> {
        for wave in plan.waves() {
            for &id in &wave.phases {
                if snapshot.status(id) != PhaseStatus::Blocked {
                    continue;
                }
                let phase = plan.phase(id).ok_or(Error::PhaseNotFound(id))?;
                if blocking_predecessor(phase, &snapshot).is_none() {
                    wlog!("phase {} unblocked: predecessors recovered", id);
                    snapshot = self
                        .store
                        .reset(
                            Transition::new(id, PhaseStatus::Pending)
                                .with_detail("predecessor recovered")
                                .in_run(run),
                        )
                        .await?;
                }
            }
        }
        Ok(snapshot)
    }

    /// Split a wave's pending phases into runnable ones and ones to block.
    async fn prepare_wave(
        &self,
        plan: &Plan,
        wave: &Wave,
        run: RunId,
        mut snapshot: StateSnapshot,
    ) -> Result<(Vec<PhaseId>, StateSnapshot)> {
        let mut runnable = Vec::new();
        for &id in &wave.phases {
            if snapshot.status(id) != PhaseStatus::Pending {
                continue;
            }
            let phase = plan.phase(id).ok_or(Error::PhaseNotFound(id))?;
            if let Some(cause) = blocking_predecessor(phase, &snapshot) {
                snapshot = self.block(id, cause, run).await?;
                continue;
            }
            let ready = phase
                .depends_on
                .iter()
                .all(|p| snapshot.status(*p) == PhaseStatus::Done);
            if ready {
                runnable.push(id);
            } else {
                wlog_debug!("phase {} left pending: predecessors not done", id);
            }
        }
        Ok((runnable, snapshot))
    }

    async fn dispatch_wave(
        &self,
        plan: &Plan,
        runnable: Vec<PhaseId>,
        executor: &Arc<dyn PhaseExecutor>,
        cancel: &CancellationToken,
        run: RunId,
        mut snapshot: StateSnapshot,
    ) -> Result<StateSnapshot> {
        let slots = self.config.slots();
        let mut queue: VecDeque<PhaseId> = runnable.into();
        let mut in_flight: JoinSet<(PhaseId, PhaseOutcome)> = JoinSet::new();

        loop {
            while in_flight.len() < slots && !cancel.is_cancelled() {
                let Some(id) = queue.pop_front() else {
                    break;
                };
                let phase = plan.phase(id).cloned().ok_or(Error::PhaseNotFound(id))?;
                snapshot = self
                    .store
                    .commit(Transition::new(id, PhaseStatus::Running).in_run(run))
                    .await?;
                self.emit(CoordinatorEvent::PhaseStarted { phase: id }).await;
                wlog_debug!("dispatch phase {} ({})", id, phase.name);

                let executor = Arc::clone(executor);
                let timeout = self.config.phase_timeout;
                in_flight.spawn(async move {
                    let outcome = execute_isolated(executor, phase, timeout).await;
                    (id, outcome)
                });
            }

            if !queue.is_empty() && cancel.is_cancelled() {
                wlog!(
                    "cancellation: {} undispatched phases stay pending",
                    queue.len()
                );
                queue.clear();
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (id, outcome) = joined.map_err(|e| Error::TaskJoin(e.to_string()))?;
            snapshot = self.record_outcome(plan, id, outcome, run).await?;
        }

        Ok(snapshot)
    }

    /// Commit a phase outcome and, on failure, block everything downstream.
    async fn record_outcome(
        &self,
        plan: &Plan,
        id: PhaseId,
        outcome: PhaseOutcome,
        run: RunId,
    ) -> Result<StateSnapshot> {
        match outcome {
            PhaseOutcome::Done => {
                wlog!("phase {} done", id);
                let snapshot = self
                    .store
                    .commit(Transition::new(id, PhaseStatus::Done).in_run(run))
                    .await?;
                self.emit(CoordinatorEvent::PhaseCompleted { phase: id }).await;
                Ok(snapshot)
            }
            PhaseOutcome::Failed { reason } => {
                wlog_warn!("phase {} failed: {}", id, reason);
                let mut snapshot = self
                    .store
                    .commit(
                        Transition::new(id, PhaseStatus::Failed)
                            .with_detail(reason.clone())
                            .in_run(run),
                    )
                    .await?;
                self.emit(CoordinatorEvent::PhaseFailed { phase: id, reason })
                    .await;

                for dependent in plan.descendants(id) {
                    if snapshot.status(dependent) == PhaseStatus::Pending {
                        snapshot = self.block(dependent, id, run).await?;
                    }
                }
                Ok(snapshot)
            }
        }
    }

    async fn block(&self, id: PhaseId, cause: PhaseId, run: RunId) -> Result<StateSnapshot> {
        wlog_warn!("phase {} blocked by phase {}", id, cause);
        let snapshot = self
            .store
            .commit(
                Transition::new(id, PhaseStatus::Blocked)
                    .with_detail(format!("predecessor phase {} did not complete", cause))
                    .in_run(run),
            )
            .await?;
        self.emit(CoordinatorEvent::PhaseBlocked { phase: id, cause })
            .await;
        Ok(snapshot)
    }

    async fn emit(&self, event: CoordinatorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// First declared predecessor that failed or is blocked.
fn blocking_predecessor(phase: &Phase, snapshot: &StateSnapshot) -> Option<PhaseId> {
    phase
        .depends_on
        .iter()
        .copied()
        .find(|p| snapshot.status(*p).is_unsuccessful())
}

/// Run one phase in its own task-local context.
///
/// Panics inside the executor and timeouts become failed outcomes.
async fn execute_isolated(
    executor: Arc<dyn PhaseExecutor>,
    phase: Phase,
    timeout: Option<Duration>,
) -> PhaseOutcome {
    let work = AssertUnwindSafe(async { executor.execute(&phase).await }).catch_unwind();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => return PhaseOutcome::failed(TIMEOUT_REASON),
        },
        None => work.await,
    };
    result.unwrap_or_else(|_| PhaseOutcome::failed("executor panicked"))
}
