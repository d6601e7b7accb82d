//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by episode-forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all episode-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Finished conversion workers, labeled by outcome (success, failure, reclaimed).
pub static CONVERSIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock duration of supervised conversion workers in seconds.
pub static CONVERSION_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Training jobs reaching a state, labeled by state.
pub static TRAINING_JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Worker processes currently supervised, labeled by kind (conversion, training).
pub static ACTIVE_WORKERS: OnceLock<GaugeVec> = OnceLock::new();

/// Dataset status transitions, labeled by source and target status.
pub static DATASET_TRANSITIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Bytes accepted by the upload endpoints.
pub static UPLOADED_BYTES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a fresh registry that is discarded,
/// leaving the first one in place.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let conversions_total = CounterVec::new(
        Opts::new("forge_conversions_total", "Finished conversion workers"),
        &["outcome"],
    )?;

    let conversion_duration = Histogram::with_opts(
        HistogramOpts::new(
            "forge_conversion_duration_seconds",
            "Conversion worker duration in seconds",
        )
        .buckets(vec![5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
    )?;

    let training_jobs_total = CounterVec::new(
        Opts::new("forge_training_jobs_total", "Training jobs by reached state"),
        &["state"],
    )?;

    let active_workers = GaugeVec::new(
        Opts::new("forge_active_workers", "Supervised worker processes"),
        &["kind"],
    )?;

    let dataset_transitions_total = CounterVec::new(
        Opts::new("forge_dataset_transitions_total", "Dataset status transitions"),
        &["from", "to"],
    )?;

    let uploaded_bytes_total =
        Counter::new("forge_uploaded_bytes_total", "Bytes accepted by upload endpoints")?;

    registry.register(Box::new(conversions_total.clone()))?;
    registry.register(Box::new(conversion_duration.clone()))?;
    registry.register(Box::new(training_jobs_total.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(dataset_transitions_total.clone()))?;
    registry.register(Box::new(uploaded_bytes_total.clone()))?;

    // Already-set cells mean metrics were initialized earlier.
    let _ = REGISTRY.set(registry);
    let _ = CONVERSIONS_TOTAL.set(conversions_total);
    let _ = CONVERSION_DURATION.set(conversion_duration);
    let _ = TRAINING_JOBS_TOTAL.set(training_jobs_total);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = DATASET_TRANSITIONS_TOTAL.set(dataset_transitions_total);
    let _ = UPLOADED_BYTES_TOTAL.set(uploaded_bytes_total);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// HTTP handler for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_recording() {
        let _ = init_metrics();
        if let Some(c) = DATASET_TRANSITIONS_TOTAL.get() {
            c.with_label_values(&["creating", "save"]).inc();
        }
        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("forge_dataset_transitions_total"));
    }
}
