//! Supervision of conversion worker processes.

pub mod conversion;
pub mod lock;

pub use conversion::{
    append_note, ConversionOutcome, ConversionSupervisor, ConversionTask, LockEntry,
    RunningConversion, WorkerCommand,
};
pub use lock::{classify_probe, is_alive, probe_liveness, Liveness, LockArtifact};
