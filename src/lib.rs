pub mod config;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod plan;
pub mod report;
pub mod state;
pub mod util;

pub use error::{Error, Result};
pub use orchestration::{Coordinator, CoordinatorConfig, PhaseExecutor, PhaseOutcome, RunReport};
pub use plan::{compile, Phase, PhaseId, PhaseStatus, Plan, PlanDescriptor, WaveId};
pub use report::Progress;
pub use state::{FileStore, MemoryStore, StateSnapshot, StateStore};
