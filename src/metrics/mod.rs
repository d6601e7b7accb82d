//! Metrics module for Prometheus-based monitoring.
//!
//! Covers dataset lifecycle transitions, conversion workers, training jobs and
//! uploads.
//!
//! # Example
//!
//! ```ignore
//! use episode_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_transition("creating", "save");
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, WorkerKind};
pub use prometheus::{export_metrics, init_metrics, metrics_handler};

pub use prometheus::{
    ACTIVE_WORKERS, CONVERSIONS_TOTAL, CONVERSION_DURATION, DATASET_TRANSITIONS_TOTAL, REGISTRY,
    TRAINING_JOBS_TOTAL, UPLOADED_BYTES_TOTAL,
};
