//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`super::init_metrics`] has run, so library
//! code can record unconditionally.

use super::prometheus::{
    ACTIVE_WORKERS, CONVERSIONS_TOTAL, CONVERSION_DURATION, DATASET_TRANSITIONS_TOTAL,
    TRAINING_JOBS_TOTAL, UPLOADED_BYTES_TOTAL,
};

/// Kind of supervised worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Conversion,
    Training,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversion => "conversion",
            Self::Training => "training",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record the end of a conversion worker.
    ///
    /// `outcome` is `success`, `failure` or `reclaimed` (dead worker found at startup).
    pub fn record_conversion(&self, outcome: &str, duration_secs: Option<f64>) {
        if let Some(total) = CONVERSIONS_TOTAL.get() {
            total.with_label_values(&[outcome]).inc();
        }
        if let (Some(hist), Some(secs)) = (CONVERSION_DURATION.get(), duration_secs) {
            hist.observe(secs);
        }

        tracing::trace!(outcome = outcome, duration_secs = ?duration_secs, "Recorded conversion metric");
    }

    pub fn record_job_state(&self, state: &str) {
        if let Some(total) = TRAINING_JOBS_TOTAL.get() {
            total.with_label_values(&[state]).inc();
        }
        tracing::trace!(state = state, "Recorded training job metric");
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        if let Some(total) = DATASET_TRANSITIONS_TOTAL.get() {
            total.with_label_values(&[from, to]).inc();
        }
        tracing::trace!(from = from, to = to, "Recorded dataset transition metric");
    }

    pub fn record_upload(&self, bytes: usize) {
        if let Some(total) = UPLOADED_BYTES_TOTAL.get() {
            total.inc_by(bytes as f64);
        }
    }

    pub fn worker_started(&self, kind: WorkerKind) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.with_label_values(&[kind.as_str()]).inc();
        }
    }

    pub fn worker_finished(&self, kind: WorkerKind) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.with_label_values(&[kind.as_str()]).dec();
        }
    }
}
