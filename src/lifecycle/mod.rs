//! Dataset lifecycle state machine.

pub mod keyed;
pub mod manager;
pub mod transitions;

pub use keyed::KeyedLocks;
pub use manager::{validate_name, validate_relative_path, DatasetLifecycleManager, ReconcileReport};
pub use transitions::TransitionTable;
