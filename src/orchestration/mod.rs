//! Orchestration layer.
//!
//! The [`Coordinator`] walks a compiled plan wave by wave and hands each
//! runnable phase to a [`PhaseExecutor`]. [`ShellExecutor`] is the stock
//! executor, running each task's verification command.

mod coordinator;
mod executor;

pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorEvent, RunOutcome, RunReport, INTERRUPTED_REASON,
    TIMEOUT_REASON,
};
pub use executor::{PhaseExecutor, PhaseOutcome, ShellExecutor};
