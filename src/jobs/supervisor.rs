//! Training job supervision.
//!
//! A submitted job is recorded as `pending` and run by a background task:
//! fetch the converted dataset (the `lerobot/` tree and the frames its tables
//! point at) where not present locally, run the trainer on it while streaming
//! its output into the job log, then pack and upload the weights. Callers poll
//! the record by id.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use futures::{stream, StreamExt, TryStreamExt};
use tokio::process::Command;
use uuid::Uuid;

use crate::convert::{FRAMES_DIR, LEROBOT_DIR};
use crate::error::JobError;
use crate::jobs::archive::pack_directory;
use crate::jobs::progress::{parse_progress, JobLog, LossyLines};
use crate::jobs::types::{TrainRequest, TrainerCommand};
use crate::lifecycle::DatasetLifecycleManager;
use crate::metrics::{MetricsCollector, WorkerKind};
use crate::storage::{
    BlobError, BlobStore, JobState, JobUpdate, RecordStore, TrainingJob, WeightsRecord,
    WEIGHTS_NAMESPACE,
};

/// Message stored on jobs that were running when the service stopped.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by supervisor restart";

pub const LOG_FILE_NAME: &str = "train.log";

/// Namespace-relative files a trainer needs: the LeRobot tree and extracted frames.
pub fn training_files(files: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|rel| {
            [LEROBOT_DIR, FRAMES_DIR]
                .iter()
                .any(|dir| rel.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/')))
        })
        .cloned()
        .collect()
}

/// Where job workspaces and fetched datasets live, and how to fetch.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub jobs_dir: PathBuf,
    pub datasets_dir: PathBuf,
    pub fetch_concurrency: usize,
}

pub struct JobSupervisor {
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    lifecycle: Option<Arc<DatasetLifecycleManager>>,
    trainer: TrainerCommand,
    paths: JobPaths,
    metrics: MetricsCollector,
}

impl JobSupervisor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        trainer: TrainerCommand,
        paths: JobPaths,
    ) -> Self {
        Self {
            store,
            blobs,
            lifecycle: None,
            trainer,
            paths,
            metrics: MetricsCollector::new(),
        }
    }

    /// Marks datasets `at work` while they are being trained on, when they are
    /// managed by this service.
    pub fn with_lifecycle(mut self, lifecycle: Arc<DatasetLifecycleManager>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn job_log(&self, job_id: &str) -> JobLog {
        JobLog::new(self.paths.jobs_dir.join(job_id).join(LOG_FILE_NAME))
    }

    /// Admits a job if its dataset has files in the blob store.
    pub async fn submit(self: &Arc<Self>, req: TrainRequest) -> Result<TrainingJob, JobError> {
        let files = match self.blobs.list(&req.dataset_name).await {
            Ok(files) => files,
            Err(BlobError::NotFound(_)) | Err(BlobError::InvalidKey(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if files.is_empty() || req.dataset_name == WEIGHTS_NAMESPACE {
            return Err(JobError::DatasetNotFound(req.dataset_name));
        }

        let job_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let now = Utc::now();
        let job = TrainingJob {
            job_id: job_id.clone(),
            dataset: req.dataset_name.clone(),
            state: JobState::Pending,
            progress: 0.0,
            message: "queued".to_string(),
            request: serde_json::to_value(&req).unwrap_or(serde_json::Value::Null),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_job(&job).await?;
        self.metrics.record_job_state(JobState::Pending.as_str());
        tracing::info!(job_id = %job_id, dataset = %req.dataset_name, files = files.len(), "Training job submitted");

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(job_id, req, files).await });
        Ok(job)
    }

    pub async fn status(&self, job_id: &str) -> Result<TrainingJob, JobError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub async fn log_tail(&self, job_id: &str, lines: usize) -> Result<String, JobError> {
        self.status(job_id).await?;
        self.job_log(job_id)
            .tail(lines)
            .await?
            .ok_or_else(|| JobError::LogNotFound(job_id.to_string()))
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<TrainingJob>, JobError> {
        Ok(self.store.list_jobs(limit).await?)
    }

    /// Fails jobs left unfinished by a previous process.
    pub async fn recover(&self) -> Result<u64, JobError> {
        let failed = self.store.fail_unfinished_jobs(INTERRUPTED_MESSAGE).await?;
        if failed > 0 {
            tracing::warn!(count = failed, "Marked interrupted training jobs as failed");
        }
        Ok(failed)
    }

    async fn update(&self, job_id: &str, update: JobUpdate) {
        let state = update.state;
        match self.store.update_job(job_id, update).await {
            Ok(true) => {
                if let Some(state) = state {
                    self.metrics.record_job_state(state.as_str());
                }
            }
            Ok(false) => tracing::debug!(job_id = job_id, "Update skipped for terminal job"),
            Err(e) => tracing::error!(job_id = job_id, error = %e, "Failed to update job record"),
        }
    }

    async fn run(self: Arc<Self>, job_id: String, req: TrainRequest, files: Vec<String>) {
        let log = self.job_log(&job_id);
        let marked = match &self.lifecycle {
            Some(lifecycle) => match lifecycle.mark_in_use(&req.dataset_name).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(dataset = %req.dataset_name, error = %e, "Dataset not marked in use");
                    false
                }
            },
            None => false,
        };

        self.metrics.worker_started(WorkerKind::Training);
        let result = self.execute(&job_id, &req, &files, &log).await;
        self.metrics.worker_finished(WorkerKind::Training);

        match result {
            Ok(()) => {
                self.update(
                    &job_id,
                    JobUpdate::state(JobState::Finished)
                        .with_progress(100.0)
                        .with_message("weights uploaded; local data removed"),
                )
                .await;
                tracing::info!(job_id = %job_id, "Training job finished");
            }
            Err(e) => {
                log.note(&format!("ERROR: {}", e)).await;
                self.update(
                    &job_id,
                    JobUpdate::state(JobState::Failed).with_message(e.to_string()),
                )
                .await;
                tracing::error!(job_id = %job_id, error = %e, "Training job failed");
            }
        }

        if marked {
            if let Some(lifecycle) = &self.lifecycle {
                if let Err(e) = lifecycle.release(&req.dataset_name).await {
                    tracing::warn!(dataset = %req.dataset_name, error = %e, "Failed to release dataset");
                }
            }
        }
    }

    async fn execute(
        &self,
        job_id: &str,
        req: &TrainRequest,
        files: &[String],
        log: &JobLog,
    ) -> Result<(), JobError> {
        let job_root = self.paths.jobs_dir.join(job_id);
        let output_dir = job_root.join("output");
        tokio::fs::create_dir_all(&job_root).await?;
        let local_dataset = self.paths.datasets_dir.join(&req.dataset_name);

        let info_key = format!("{}/meta/info.json", LEROBOT_DIR);
        if !files.iter().any(|rel| *rel == info_key) {
            return Err(JobError::NotConverted(req.dataset_name.clone()));
        }
        let needed = training_files(files);
        self.fetch_missing(job_id, &req.dataset_name, needed, &local_dataset, log)
            .await?;

        let args = self
            .trainer
            .arguments(req, &local_dataset.join(LEROBOT_DIR), &output_dir, job_id);
        log.note(&format!("CMD: {}", self.trainer.display(&args)))
            .await;
        self.update(
            job_id,
            JobUpdate::state(JobState::Running).with_message("training started"),
        )
        .await;

        self.run_trainer(job_id, &args, log).await?;

        self.update(
            job_id,
            JobUpdate::progress(100.0).with_message("uploading weights"),
        )
        .await;
        log.note("Uploading weights").await;
        self.upload_weights(job_id, req, &job_root, &output_dir)
            .await?;

        for dir in [&local_dataset, &output_dir] {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                tracing::debug!(path = %dir.display(), error = %e, "Cleanup skipped");
            }
        }
        log.note("Cleanup complete").await;
        Ok(())
    }

    async fn fetch_missing(
        &self,
        job_id: &str,
        dataset: &str,
        files: Vec<String>,
        local_dataset: &Path,
        log: &JobLog,
    ) -> Result<(), JobError> {
        let missing: Vec<String> = files
            .into_iter()
            .filter(|rel| !local_dataset.join(rel).exists())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        self.update(job_id, JobUpdate::default().with_message("fetching dataset"))
            .await;
        log.note(&format!("Downloading dataset ({} files)", missing.len()))
            .await;

        let fetched: Vec<u64> = stream::iter(missing)
            .map(|rel: String| {
                let blobs = Arc::clone(&self.blobs);
                let key = format!("{}/{}", dataset, rel);
                let dest = local_dataset.join(&rel);
                async move { blobs.fetch_to(&key, &dest).await }
            })
            .buffer_unordered(self.paths.fetch_concurrency.max(1))
            .try_collect()
            .await?;

        tracing::info!(
            job_id = job_id,
            files = fetched.len(),
            bytes = fetched.iter().sum::<u64>(),
            "Dataset fetched"
        );
        Ok(())
    }

    async fn run_trainer(&self, job_id: &str, args: &[String], log: &JobLog) -> Result<(), JobError> {
        let mut child = Command::new(&self.trainer.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::Spawn(format!("{}: {}", self.trainer.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JobError::Spawn("trainer stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| JobError::Spawn("trainer stderr not captured".to_string()))?;
        let mut stdout_lines = LossyLines::new(stdout);
        let mut stderr_lines = LossyLines::new(stderr);
        let mut stdout_done = false;
        let mut stderr_done = false;

        while !(stdout_done && stderr_done) {
            let (line, from_stdout) = tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => (line, true),
                line = stderr_lines.next_line(), if !stderr_done => (line, false),
            };
            let ended = match line {
                Ok(Some(l)) => {
                    self.handle_line(job_id, &l, log).await;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    tracing::warn!(job_id = job_id, error = %e, "Error reading trainer output");
                    true
                }
            };
            if ended {
                if from_stdout {
                    stdout_done = true;
                } else {
                    stderr_done = true;
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(JobError::Process(status.to_string()));
        }
        Ok(())
    }

    async fn handle_line(&self, job_id: &str, line: &str, log: &JobLog) {
        log.note(line).await;
        if let Some(progress) = parse_progress(line) {
            self.update(job_id, JobUpdate::progress(progress)).await;
        }
    }

    async fn upload_weights(
        &self,
        job_id: &str,
        req: &TrainRequest,
        job_root: &Path,
        output_dir: &Path,
    ) -> Result<(), JobError> {
        let archive_name = format!("{}.tar.gz", job_id);
        let archive = job_root.join(&archive_name);
        let size = pack_directory(output_dir, &archive).await?;

        let meta = self
            .blobs
            .put_file(&format!("{}/{}", WEIGHTS_NAMESPACE, archive_name), &archive)
            .await?;
        self.metrics.record_upload(size as usize);

        self.store
            .insert_weights(&WeightsRecord {
                name: archive_name,
                dataset: req.dataset_name.clone(),
                steps: req.steps as i64,
                created_at: Utc::now(),
            })
            .await?;
        tracing::info!(job_id = job_id, key = %meta.key, bytes = size, "Weights uploaded");

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            tracing::debug!(path = %archive.display(), error = %e, "Archive cleanup skipped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::storage::{LocalBlobStore, SqliteRecordStore};

    const WRITE_OUTPUT: &str = r#"
        for a in "$@"; do
            case "$a" in --output_dir=*) out="${a#--output_dir=}";; esac
        done
        mkdir -p "$out"
        echo weights > "$out/model.bin"
    "#;

    async fn supervisor(root: &Path, script: &str) -> (Arc<JobSupervisor>, Arc<LocalBlobStore>) {
        let store = Arc::new(SqliteRecordStore::connect("sqlite::memory:").await.unwrap());
        let blobs = Arc::new(LocalBlobStore::new(root.join("blobs")));
        blobs.put("demo/ep1/data_0.db3", b"bag").await.unwrap();
        blobs.put("demo/lerobot/meta/info.json", b"{}").await.unwrap();
        blobs
            .put("demo/frames/episode1/cam_front/frame_000000.png", b"png")
            .await
            .unwrap();
        blobs.put("demo/lerobot0/meta/info.json", b"{}").await.unwrap();

        let trainer = TrainerCommand::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "trainer".to_string()],
        );
        let paths = JobPaths {
            jobs_dir: root.join("jobs"),
            datasets_dir: root.join("datasets"),
            fetch_concurrency: 2,
        };
        (
            Arc::new(JobSupervisor::new(store, blobs.clone(), trainer, paths)),
            blobs,
        )
    }

    async fn wait_terminal(sup: &JobSupervisor, job_id: &str) -> TrainingJob {
        for _ in 0..200 {
            let job = sup.status(job_id).await.unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} never finished", job_id);
    }

    #[tokio::test]
    async fn test_unknown_dataset_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, _) = supervisor(dir.path(), "exit 0").await;
        assert!(matches!(
            sup.submit(TrainRequest::new("missing")).await.unwrap_err(),
            JobError::DatasetNotFound(_)
        ));
        assert!(matches!(
            sup.status("nope").await.unwrap_err(),
            JobError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_successful_job_uploads_weights() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("echo 'step 50/100'; {}", WRITE_OUTPUT);
        let (sup, blobs) = supervisor(dir.path(), &script).await;

        let job = sup.submit(TrainRequest::new("demo")).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.job_id.len(), 8);

        let done = wait_terminal(&sup, &job.job_id).await;
        assert_eq!(done.state, JobState::Finished, "{}", done.message);
        assert_eq!(done.progress, 100.0);

        let weights = blobs.list(WEIGHTS_NAMESPACE).await.unwrap();
        assert_eq!(weights, vec![format!("{}.tar.gz", job.job_id)]);
        assert!(!dir.path().join("datasets/demo").exists());

        let tail = sup.log_tail(&job.job_id, 50).await.unwrap();
        assert!(tail.contains("step 50/100"));
        assert!(tail.contains("CMD: sh"));
        assert!(tail.contains("Cleanup complete"));
    }

    #[tokio::test]
    async fn test_failing_trainer_keeps_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, _) = supervisor(dir.path(), "echo 'step 50/100'; echo oops >&2; exit 2").await;

        let job = sup.submit(TrainRequest::new("demo")).await.unwrap();
        let done = wait_terminal(&sup, &job.job_id).await;
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.progress, 50.0);
        assert!(done.message.contains("exit"));

        let tail = sup.log_tail(&job.job_id, 10).await.unwrap();
        assert!(tail.contains("oops"));
        assert!(tail.contains("ERROR:"));
        // Fetched data stays on failure.
        assert!(dir.path().join("datasets/demo/lerobot/meta/info.json").exists());
    }

    #[test]
    fn test_training_files_keep_dataset_and_frames() {
        let files: Vec<String> = [
            "ep1/data_0.db3",
            "frames/episode1/cam/frame_000000.png",
            "lerobot/meta/info.json",
            "lerobot0/meta/info.json",
            "lerobot_notes.txt",
            "ros2bag_msg.json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            training_files(&files),
            vec!["frames/episode1/cam/frame_000000.png", "lerobot/meta/info.json"]
        );
    }

    #[tokio::test]
    async fn test_trainer_root_is_the_lerobot_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            r#"
            prev=""
            for a in "$@"; do
                if [ "$prev" = "--dataset.root" ]; then root="$a"; fi
                prev="$a"
            done
            echo "root=$root"
            test -f "$root/meta/info.json" || exit 3
            test -f "$root/../frames/episode1/cam_front/frame_000000.png" || exit 4
            test ! -e "$root/../ep1" || exit 5
            test ! -e "$root/../lerobot0" || exit 6
            {}
            "#,
            WRITE_OUTPUT
        );
        let (sup, _) = supervisor(dir.path(), &script).await;

        let job = sup.submit(TrainRequest::new("demo")).await.unwrap();
        let done = wait_terminal(&sup, &job.job_id).await;
        let tail = sup.log_tail(&job.job_id, 50).await.unwrap();
        assert_eq!(done.state, JobState::Finished, "{}\n{}", done.message, tail);

        let expected = dir.path().join("datasets/demo/lerobot");
        assert!(tail.contains(&format!("root={}", expected.display())), "{}", tail);
    }

    #[tokio::test]
    async fn test_unconverted_dataset_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, blobs) = supervisor(dir.path(), WRITE_OUTPUT).await;
        blobs.put("raw/ep1/data_0.db3", b"bag").await.unwrap();

        let job = sup.submit(TrainRequest::new("raw")).await.unwrap();
        let done = wait_terminal(&sup, &job.job_id).await;
        assert_eq!(done.state, JobState::Failed);
        assert!(done.message.contains("no converted LeRobot output"), "{}", done.message);
    }

    #[tokio::test]
    async fn test_undecodable_and_bulky_output_is_drained() {
        let dir = tempfile::tempdir().unwrap();
        // More than a pipe buffer on both streams, after bytes that are not UTF-8.
        let script = format!(
            r#"
            printf '\377\n'
            printf '\376\n' >&2
            head -c 200000 /dev/zero | tr '\0' x
            echo
            head -c 200000 /dev/zero | tr '\0' y >&2
            echo 'step 100/100'
            {}
            "#,
            WRITE_OUTPUT
        );
        let (sup, _) = supervisor(dir.path(), &script).await;

        let job = sup.submit(TrainRequest::new("demo")).await.unwrap();
        let done = wait_terminal(&sup, &job.job_id).await;
        assert_eq!(done.state, JobState::Finished, "{}", done.message);

        let tail = sup.log_tail(&job.job_id, 20).await.unwrap();
        assert!(tail.contains('\u{FFFD}'));
        assert!(tail.contains("step 100/100"));
    }

    #[tokio::test]
    async fn test_recover_fails_unfinished_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, _) = supervisor(dir.path(), "sleep 5").await;
        let job = sup.submit(TrainRequest::new("demo")).await.unwrap();

        assert_eq!(sup.recover().await.unwrap(), 1);
        let failed = sup.status(&job.job_id).await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.message, INTERRUPTED_MESSAGE);
    }
}
