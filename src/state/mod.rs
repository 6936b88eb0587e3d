//! State persistence for plan execution.
//!
//! The snapshot is the single source of truth for phase statuses and the
//! only thing a resumed run trusts.

mod snapshot;
mod store;

pub use snapshot::{RunId, StateEvent, StateSnapshot, Transition, STATE_VERSION};
pub use store::{FileStore, MemoryStore, StateStore};
