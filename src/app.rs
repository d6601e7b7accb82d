//! Service assembly from [`ServiceConfig`].

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::AppState;
use crate::config::ServiceConfig;
use crate::jobs::{JobPaths, JobSupervisor, TrainerCommand};
use crate::lifecycle::{DatasetLifecycleManager, ReconcileReport};
use crate::metrics::init_metrics;
use crate::storage::{BlobStore, HttpBlobStore, LocalBlobStore, RecordStore, SqliteRecordStore};
use crate::supervisor::{ConversionSupervisor, WorkerCommand};

/// A started service: shared state plus what startup repaired.
pub struct Service {
    pub state: AppState,
    pub reconcile: ReconcileReport,
    pub recovered_jobs: u64,
}

/// Builds stores, supervisors and managers without touching leftover state.
pub async fn build_state(config: &ServiceConfig) -> Result<AppState> {
    config.validate()?;
    init_metrics().context("Failed to initialize metrics")?;

    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteRecordStore::connect(&config.database_url)
            .await
            .with_context(|| format!("Failed to open record store {}", config.database_url))?,
    );

    tokio::fs::create_dir_all(&config.storage_root)
        .await
        .with_context(|| format!("Failed to create {}", config.storage_root.display()))?;
    let local: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.storage_root));

    // A configured worker program must accept the `convert` subcommand.
    let worker = match &config.worker_program {
        Some(program) => WorkerCommand::new(program.clone(), vec!["convert".to_string()]),
        None => WorkerCommand::current_exe()?,
    };
    let supervisor = Arc::new(
        ConversionSupervisor::new(&config.state_dir, worker)
            .with_poll_interval(config.adoption_poll_interval),
    );
    let lifecycle = Arc::new(DatasetLifecycleManager::new(
        Arc::clone(&store),
        Arc::clone(&local),
        supervisor,
    ));

    let training_blobs: Arc<dyn BlobStore> = match &config.remote_blob_url {
        Some(url) => {
            let remote = HttpBlobStore::new(url.as_str(), config.http_timeout)?;
            if let Err(e) = remote
                .check_health(config.health_retries, config.health_backoff)
                .await
            {
                tracing::warn!(url = %url, error = %e, "Remote blob store unreachable at startup");
            }
            Arc::new(remote)
        }
        None => Arc::clone(&local),
    };

    let jobs = Arc::new(
        JobSupervisor::new(
            Arc::clone(&store),
            training_blobs,
            TrainerCommand::new(config.trainer_program.clone(), config.trainer_args.clone()),
            JobPaths {
                jobs_dir: config.jobs_dir.clone(),
                datasets_dir: config.local_datasets_dir.clone(),
                fetch_concurrency: config.fetch_concurrency,
            },
        )
        .with_lifecycle(Arc::clone(&lifecycle)),
    );

    Ok(AppState {
        lifecycle,
        jobs,
        store,
        blobs: local,
        max_upload_bytes: config.max_upload_bytes,
    })
}

/// Builds the service and repairs what a previous process left behind.
pub async fn start(config: &ServiceConfig) -> Result<Service> {
    let state = build_state(config).await?;
    let reconcile = state
        .lifecycle
        .reconcile()
        .await
        .context("Startup reconciliation failed")?;
    let recovered_jobs = state
        .jobs
        .recover()
        .await
        .context("Training job recovery failed")?;

    Ok(Service {
        state,
        reconcile,
        recovered_jobs,
    })
}
