//! Persistent storage: the SQLite record store and blob stores.
//!
//! - **Records**: dataset, weights and training job metadata keyed by name or id
//! - **Blobs**: dataset files and trained weight archives, local or over HTTP

pub mod artifacts;
pub mod database;
pub mod models;
pub mod remote;
pub mod schema;

pub use artifacts::{
    compute_checksum, validate_key, validate_namespace, BlobError, BlobMeta, BlobStore,
    LocalBlobStore, WEIGHTS_NAMESPACE,
};
pub use database::{RecordStore, SqliteRecordStore, StoreError};
pub use models::{
    DatasetRecord, DatasetStatus, JobState, JobUpdate, TrainingJob, WeightsRecord,
};
pub use remote::HttpBlobStore;
