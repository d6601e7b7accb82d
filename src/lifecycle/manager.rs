//! Dataset lifecycle: creation, uploads, conversion and training use.
//!
//! Every status change holds the dataset's [`KeyedLocks`] entry and is applied
//! with a compare-and-swap on the record, so concurrent requests for one name
//! observe a single linear history. Completion of a conversion is handled by a
//! watcher task that owns the worker; request handlers never wait on it.

use std::collections::HashSet;
use std::path::{Component, Path};
use std::sync::Arc;

use crate::convert::ConversionOptions;
use crate::error::{LifecycleError, SupervisorError};
use crate::lifecycle::keyed::KeyedLocks;
use crate::lifecycle::transitions::TransitionTable;
use crate::metrics::MetricsCollector;
use crate::storage::{
    BlobMeta, BlobStore, DatasetRecord, DatasetStatus, RecordStore, StoreError, WEIGHTS_NAMESPACE,
};
use crate::supervisor::{ConversionOutcome, ConversionSupervisor, ConversionTask, RunningConversion};
use crate::sync::{read_json, SyncedManifest};

/// What startup reconciliation did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Datasets whose lock named a dead worker.
    pub reclaimed: Vec<String>,
    /// Datasets whose live worker is now polled by a watcher.
    pub adopted: Vec<String>,
    /// Datasets moved from conversion back to save.
    pub rolled_back: Vec<String>,
}

/// Checks a dataset name: non-empty, a single path component, not reserved.
pub fn validate_name(name: &str) -> Result<(), LifecycleError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name == WEIGHTS_NAMESPACE;
    if invalid {
        return Err(LifecycleError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Checks an upload path: relative, with no `.`/`..` or root components.
pub fn validate_relative_path(rel: &str) -> Result<(), LifecycleError> {
    let path = Path::new(rel);
    let ok = !rel.is_empty()
        && !rel.contains('\\')
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(LifecycleError::InvalidName(rel.to_string()));
    }
    Ok(())
}

pub struct DatasetLifecycleManager {
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    supervisor: Arc<ConversionSupervisor>,
    locks: KeyedLocks,
    transitions: TransitionTable,
    metrics: MetricsCollector,
}

impl DatasetLifecycleManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        supervisor: Arc<ConversionSupervisor>,
    ) -> Self {
        Self {
            store,
            blobs,
            supervisor,
            locks: KeyedLocks::new(),
            transitions: TransitionTable::new(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn supervisor(&self) -> &ConversionSupervisor {
        &self.supervisor
    }

    async fn require(
        &self,
        name: &str,
        expected: DatasetStatus,
    ) -> Result<DatasetRecord, LifecycleError> {
        let record = self.status(name).await?;
        if record.status != expected {
            return Err(LifecycleError::InvalidState {
                name: name.to_string(),
                expected: expected.to_string(),
                actual: record.status.to_string(),
            });
        }
        Ok(record)
    }

    /// Applies `from -> to` on the record. Caller holds the dataset's lock.
    async fn transition(
        &self,
        name: &str,
        from: DatasetStatus,
        to: DatasetStatus,
    ) -> Result<(), LifecycleError> {
        self.transitions.check(from, to)?;
        if !self.store.compare_and_set_status(name, from, to).await? {
            let actual = self.status(name).await?.status;
            return Err(LifecycleError::InvalidState {
                name: name.to_string(),
                expected: from.to_string(),
                actual: actual.to_string(),
            });
        }

        self.metrics.record_transition(from.as_str(), to.as_str());
        tracing::info!(dataset = name, from = %from, to = %to, "Dataset status changed");
        Ok(())
    }

    /// Registers a new dataset in `creating` and allocates its storage namespace.
    pub async fn create(&self, name: &str) -> Result<DatasetRecord, LifecycleError> {
        validate_name(name)?;
        let _guard = self.locks.lock(name).await;

        let record = DatasetRecord::new_rosbag(name);
        self.store
            .insert_dataset(&record)
            .await
            .map_err(|e| match e {
                StoreError::DuplicateName(n) => LifecycleError::DuplicateName(n),
                other => LifecycleError::Store(other),
            })?;
        self.blobs.create_namespace(name).await?;

        tracing::info!(dataset = name, "Dataset created");
        Ok(record)
    }

    /// Stores one file of a dataset that is still being created.
    pub async fn upload_file(
        &self,
        name: &str,
        relative_path: &str,
        data: &[u8],
    ) -> Result<BlobMeta, LifecycleError> {
        validate_name(name)?;
        validate_relative_path(relative_path)?;
        let _guard = self.locks.lock(name).await;
        self.require(name, DatasetStatus::Creating).await?;

        let meta = self
            .blobs
            .put(&format!("{}/{}", name, relative_path), data)
            .await?;
        self.metrics.record_upload(data.len());
        Ok(meta)
    }

    /// Closes uploads and starts conversion.
    ///
    /// The dataset stays in `save` when the worker cannot be launched.
    pub async fn save(self: &Arc<Self>, name: &str) -> Result<ConversionTask, LifecycleError> {
        {
            let _guard = self.locks.lock(name).await;
            self.require(name, DatasetStatus::Creating).await?;
            self.transition(name, DatasetStatus::Creating, DatasetStatus::Save)
                .await?;
        }
        self.convert(name).await
    }

    /// Launches a conversion worker for a dataset in `save`.
    pub async fn convert(self: &Arc<Self>, name: &str) -> Result<ConversionTask, LifecycleError> {
        let running = {
            let _guard = self.locks.lock(name).await;
            self.require(name, DatasetStatus::Save).await?;
            self.transition(name, DatasetStatus::Save, DatasetStatus::Conversion)
                .await?;

            match self.launch(name) {
                Ok(running) => running,
                Err(e) => {
                    tracing::error!(dataset = name, error = %e, "Conversion launch failed; rolling back");
                    self.transition(name, DatasetStatus::Conversion, DatasetStatus::Save)
                        .await?;
                    return Err(e);
                }
            }
        };

        let task = running.task.clone();
        self.watch(running);
        Ok(task)
    }

    fn conversion_options(&self, name: &str) -> Result<ConversionOptions, LifecycleError> {
        let root = self.blobs.namespace_dir(name).ok_or_else(|| {
            SupervisorError::Launch(format!("no local directory for dataset '{}'", name))
        })?;
        Ok(ConversionOptions::for_namespace(&root))
    }

    fn launch(&self, name: &str) -> Result<RunningConversion, LifecycleError> {
        let opts = self.conversion_options(name)?;
        Ok(self.supervisor.launch(name, &opts)?)
    }

    fn watch(self: &Arc<Self>, running: RunningConversion) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.supervisor.wait(running).await;
            this.complete(outcome).await;
        });
    }

    async fn complete(&self, outcome: ConversionOutcome) {
        let dataset = outcome.dataset.clone();
        if let Err(e) = self.finish_conversion(outcome).await {
            tracing::error!(dataset = %dataset, error = %e, "Failed to record conversion completion");
        }
    }

    /// Records a finished worker: `store` on success, back to `save` otherwise.
    pub async fn finish_conversion(
        &self,
        outcome: ConversionOutcome,
    ) -> Result<DatasetStatus, LifecycleError> {
        let name = outcome.dataset.as_str();
        let _guard = self.locks.lock(name).await;

        if !outcome.success {
            self.transition(name, DatasetStatus::Conversion, DatasetStatus::Save)
                .await?;
            return Ok(DatasetStatus::Save);
        }

        match read_json::<SyncedManifest>(&outcome.synced_manifest) {
            Ok(manifest) => {
                self.store
                    .set_num_episodes(name, manifest.num_episodes as i64)
                    .await?;
            }
            Err(e) => tracing::warn!(
                dataset = name,
                manifest = %outcome.synced_manifest.display(),
                error = %e,
                "Synchronized manifest unreadable; episode count not updated"
            ),
        }
        self.transition(name, DatasetStatus::Conversion, DatasetStatus::Store)
            .await?;
        Ok(DatasetStatus::Store)
    }

    /// Marks a stored dataset as used by training.
    pub async fn mark_in_use(&self, name: &str) -> Result<(), LifecycleError> {
        let _guard = self.locks.lock(name).await;
        self.require(name, DatasetStatus::Store).await?;
        self.transition(name, DatasetStatus::Store, DatasetStatus::AtWork)
            .await
    }

    pub async fn release(&self, name: &str) -> Result<(), LifecycleError> {
        let _guard = self.locks.lock(name).await;
        self.require(name, DatasetStatus::AtWork).await?;
        self.transition(name, DatasetStatus::AtWork, DatasetStatus::Store)
            .await
    }

    pub async fn status(&self, name: &str) -> Result<DatasetRecord, LifecycleError> {
        self.store
            .get_dataset(name)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<DatasetRecord>, LifecycleError> {
        Ok(self.store.list_datasets(limit).await?)
    }

    /// Repairs state left by a previous process.
    ///
    /// Dead-worker locks are removed and their datasets return to `save`; live
    /// workers are adopted by a polling watcher; datasets in `conversion` with
    /// no lock at all return to `save`.
    pub async fn reconcile(self: &Arc<Self>) -> Result<ReconcileReport, LifecycleError> {
        let mut report = ReconcileReport::default();
        let mut adopted: HashSet<String> = HashSet::new();

        for entry in self.supervisor.scan_locks()? {
            let name = entry.dataset.clone();
            if entry.is_alive() {
                let synced = self
                    .conversion_options(&name)
                    .map(|o| o.synced_path())
                    .unwrap_or_default();
                tracing::info!(dataset = %name, "Adopting running conversion worker");
                adopted.insert(name.clone());
                report.adopted.push(name);

                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = this.supervisor.wait_for_pid(entry, synced).await;
                    this.complete(outcome).await;
                });
                continue;
            }

            self.supervisor.reclaim(&entry);
            report.reclaimed.push(name.clone());
            let _guard = self.locks.lock(&name).await;
            if self
                .store
                .compare_and_set_status(&name, DatasetStatus::Conversion, DatasetStatus::Save)
                .await?
            {
                self.metrics.record_transition("conversion", "save");
                report.rolled_back.push(name);
            }
        }

        for record in self
            .store
            .datasets_with_status(DatasetStatus::Conversion)
            .await?
        {
            if adopted.contains(&record.name) {
                continue;
            }
            let _guard = self.locks.lock(&record.name).await;
            if self
                .store
                .compare_and_set_status(&record.name, DatasetStatus::Conversion, DatasetStatus::Save)
                .await?
            {
                tracing::warn!(dataset = %record.name, "Conversion without lock rolled back");
                self.metrics.record_transition("conversion", "save");
                report.rolled_back.push(record.name);
            }
        }

        tracing::info!(
            reclaimed = report.reclaimed.len(),
            adopted = report.adopted.len(),
            rolled_back = report.rolled_back.len(),
            "Startup reconciliation complete"
        );
        Ok(report)
    }
}
