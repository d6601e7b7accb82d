//! episode-forge: ROS 2 bag captures to frame-synchronized training datasets.
//!
//! This library reads episode message logs, extracts and synchronizes joint
//! states with camera frames, writes LeRobot-style datasets, and supervises the
//! conversion and training workers behind a small HTTP service.

// Core modules
pub mod api;
pub mod app;
pub mod bag;
pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;
pub mod storage;
pub mod supervisor;
pub mod sync;

// Re-export commonly used error types
pub use error::{
    BagError, ConversionError, DecodeError, JobError, LifecycleError, SupervisorError,
};

pub use config::{ConfigError, ServiceConfig};
pub use convert::{run_conversion, ConversionOptions, ConversionReport};
pub use jobs::{JobSupervisor, TrainRequest};
pub use lifecycle::DatasetLifecycleManager;
pub use storage::{BlobError, DatasetRecord, DatasetStatus, StoreError, TrainingJob};
pub use supervisor::ConversionSupervisor;
pub use sync::{StreamSynchronizer, SyncedManifest};
