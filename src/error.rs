//! Error types for episode-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Message log reading and topic classification
//! - Payload decoding (CDR messages, camera frames)
//! - Bag-to-dataset conversion
//! - Dataset lifecycle transitions
//! - Conversion worker supervision
//! - Training job supervision
//!
//! Storage errors live next to their backends in [`crate::storage`].

use thiserror::Error;

use crate::storage::{BlobError, StoreError};

/// Errors raised while decoding a single message or frame.
///
/// A decode failure is local: callers skip the offending message and keep going.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Payload truncated: needed {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        needed: usize,
        offset: usize,
        available: usize,
    },

    #[error("Unsupported CDR encapsulation kind 0x{0:04x}")]
    UnsupportedEncapsulation(u16),

    #[error("String field is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Unsupported image encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("Image buffer too small: expected at least {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("Invalid image geometry: {0}")]
    InvalidGeometry(String),

    #[error("Frame shape {actual:?} does not match dataset shape {expected:?}")]
    ShapeMismatch { expected: [u32; 3], actual: [u32; 3] },

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading episode message logs.
#[derive(Debug, Error)]
pub enum BagError {
    /// A required topic is missing or ambiguous. Fatal for the run.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Episode directory '{0}' contains no .db3 files")]
    NoStorageFiles(String),

    #[error("Message log database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a full bag-to-dataset conversion run.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Bag root '{0}' is not a directory")]
    NotADirectory(String),

    #[error("No episode directories with .db3 files under '{0}'")]
    NoEpisodes(String),

    #[error(transparent)]
    Bag(#[from] BagError),

    #[error("Dataset table error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by dataset lifecycle operations.
///
/// Guard violations are reported verbatim and never coerced into another state.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Dataset '{0}' already exists")]
    DuplicateName(String),

    #[error("Dataset '{0}' not found")]
    NotFound(String),

    #[error("Dataset '{name}' is in state '{actual}', expected '{expected}'")]
    InvalidState {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid state transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid dataset name '{0}'")]
    InvalidName(String),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),
}

/// Errors raised by the conversion worker supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Another live worker already holds the dataset's lock.
    #[error("Conversion of '{dataset}' already running (pid {pid})")]
    Conflict { dataset: String, pid: i32 },

    #[error("Failed to launch conversion worker: {0}")]
    Launch(String),

    #[error("Corrupt lock artifact '{path}': {reason}")]
    CorruptLock { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by training job submission and execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Dataset '{0}' not found in blob store")]
    DatasetNotFound(String),

    #[error("Log for job '{0}' not created yet")]
    LogNotFound(String),

    #[error("Dataset '{0}' has no converted LeRobot output")]
    NotConverted(String),

    #[error("Failed to spawn trainer: {0}")]
    Spawn(String),

    /// The trainer exited unsuccessfully.
    #[error("Trainer exited with {0}")]
    Process(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_error_display() {
        let err = LifecycleError::InvalidState {
            name: "demo".to_string(),
            expected: "creating".to_string(),
            actual: "conversion".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("demo"));
        assert!(msg.contains("conversion"));
        assert!(msg.contains("creating"));
    }

    #[test]
    fn test_conflict_display_names_pid() {
        let err = SupervisorError::Conflict {
            dataset: "demo".to_string(),
            pid: 4242,
        };
        assert!(err.to_string().contains("4242"));

        let wrapped: LifecycleError = err.into();
        assert!(matches!(
            wrapped,
            LifecycleError::Supervisor(SupervisorError::Conflict { .. })
        ));
    }

    #[test]
    fn test_configuration_error_is_bag_error() {
        let err: ConversionError = BagError::Configuration("JointState topic not found".into()).into();
        assert!(err.to_string().contains("JointState"));
    }
}
