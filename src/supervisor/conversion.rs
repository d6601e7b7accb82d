//! Conversion worker supervision.
//!
//! One worker per dataset at a time. The lock artifact records the worker pid
//! so a restarted supervisor can tell a live worker from a dead one. Worker
//! output goes to a per-run log file; the watcher appends a note there when a
//! run fails.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::{Child, Command};

use crate::convert::ConversionOptions;
use crate::error::SupervisorError;
use crate::metrics::{MetricsCollector, WorkerKind};
use crate::supervisor::lock::{is_alive, LockArtifact};

/// Program and leading arguments that start a conversion worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// This executable's own `convert` subcommand.
    pub fn current_exe() -> Result<Self, SupervisorError> {
        Ok(Self::new(std::env::current_exe()?, vec!["convert".to_string()]))
    }

    /// Full argument list for converting with `opts`.
    pub fn arguments(&self, opts: &ConversionOptions) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(opts.bag_root.display().to_string());
        args.extend([
            "--output".to_string(),
            opts.output.display().to_string(),
            "--json".to_string(),
            opts.json.display().to_string(),
            "--images".to_string(),
            opts.images.display().to_string(),
            "--synced".to_string(),
            opts.synced_path().display().to_string(),
            "--default-fps".to_string(),
            opts.default_fps.to_string(),
        ]);
        args
    }
}

/// A conversion that may have a live worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionTask {
    pub dataset: String,
    pub worker_pid: i32,
    pub log_path: PathBuf,
    pub lock_path: PathBuf,
}

/// A worker spawned by this process, awaiting completion.
#[derive(Debug)]
pub struct RunningConversion {
    pub task: ConversionTask,
    pub synced_manifest: PathBuf,
    child: Child,
    started: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub dataset: String,
    pub success: bool,
    /// Exit code when the worker was a child of this process and exited normally.
    pub exit_code: Option<i32>,
    pub log_path: PathBuf,
    pub synced_manifest: PathBuf,
}

/// A lock file found on disk.
#[derive(Debug)]
pub struct LockEntry {
    /// Dataset name taken from the lock file name.
    pub dataset: String,
    pub path: PathBuf,
    /// `None` when the file could not be parsed.
    pub artifact: Option<LockArtifact>,
}

impl LockEntry {
    pub fn is_alive(&self) -> bool {
        self.artifact.as_ref().is_some_and(|a| is_alive(a.pid))
    }
}

pub struct ConversionSupervisor {
    state_dir: PathBuf,
    worker: WorkerCommand,
    poll_interval: Duration,
    metrics: MetricsCollector,
}

impl ConversionSupervisor {
    pub fn new(state_dir: impl Into<PathBuf>, worker: WorkerCommand) -> Self {
        Self {
            state_dir: state_dir.into(),
            worker,
            poll_interval: Duration::from_secs(2),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn lock_path(&self, dataset: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", dataset))
    }

    /// Claims the dataset's lock, reclaiming it if its holder is dead.
    fn claim(&self, dataset: &str, log_path: &Path) -> Result<PathBuf, SupervisorError> {
        let path = self.lock_path(dataset);
        let claim = LockArtifact::new(std::process::id() as i32, dataset, log_path);

        for _ in 0..2 {
            match claim.claim(&path) {
                Ok(()) => return Ok(path),
                Err(SupervisorError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }

            match LockArtifact::read(&path) {
                Ok(existing) if is_alive(existing.pid) => {
                    return Err(SupervisorError::Conflict {
                        dataset: dataset.to_string(),
                        pid: existing.pid,
                    });
                }
                Ok(existing) => {
                    tracing::warn!(
                        dataset = dataset,
                        pid = existing.pid,
                        "Reclaiming lock of dead conversion worker"
                    );
                    append_note(
                        &existing.log_path,
                        &format!("worker pid {} found dead; lock reclaimed", existing.pid),
                    );
                    self.metrics.record_conversion("reclaimed", None);
                }
                Err(e) => {
                    tracing::warn!(dataset = dataset, error = %e, "Discarding unreadable lock");
                }
            }
            remove_lock(&path);
        }

        Err(SupervisorError::Launch(format!(
            "could not claim lock {}",
            path.display()
        )))
    }

    /// Starts a worker for `dataset` unless a live one already holds the lock.
    pub fn launch(
        &self,
        dataset: &str,
        opts: &ConversionOptions,
    ) -> Result<RunningConversion, SupervisorError> {
        fs::create_dir_all(self.logs_dir())?;
        let log_path = self.logs_dir().join(format!(
            "{}_{}.log",
            dataset,
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let lock_path = self.claim(dataset, &log_path)?;

        match self.spawn_worker(dataset, opts, &log_path, &lock_path) {
            Ok(running) => Ok(running),
            Err(e) => {
                remove_lock(&lock_path);
                Err(e)
            }
        }
    }

    fn spawn_worker(
        &self,
        dataset: &str,
        opts: &ConversionOptions,
        log_path: &Path,
        lock_path: &Path,
    ) -> Result<RunningConversion, SupervisorError> {
        let stdout = OpenOptions::new().create(true).append(true).open(log_path)?;
        let stderr = stdout.try_clone()?;

        let args = self.worker.arguments(opts);
        let mut cmd = Command::new(&self.worker.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);

        let child = cmd.spawn().map_err(|e| {
            SupervisorError::Launch(format!("{}: {}", self.worker.program.display(), e))
        })?;
        let pid = child
            .id()
            .map(|p| p as i32)
            .ok_or_else(|| SupervisorError::Launch("worker exited before reporting a pid".into()))?;

        LockArtifact::new(pid, dataset, log_path).write_atomic(lock_path)?;
        self.metrics.worker_started(WorkerKind::Conversion);

        tracing::info!(
            dataset = dataset,
            pid = pid,
            log = %log_path.display(),
            "Conversion worker started"
        );

        Ok(RunningConversion {
            task: ConversionTask {
                dataset: dataset.to_string(),
                worker_pid: pid,
                log_path: log_path.to_path_buf(),
                lock_path: lock_path.to_path_buf(),
            },
            synced_manifest: opts.synced_path(),
            child,
            started: Instant::now(),
        })
    }

    /// Awaits a worker this process spawned, then releases its lock.
    pub async fn wait(&self, mut running: RunningConversion) -> ConversionOutcome {
        let status = running.child.wait().await;
        let task = &running.task;

        let (success, exit_code) = match &status {
            Ok(s) => (s.success(), s.code()),
            Err(_) => (false, None),
        };
        if !success {
            append_note(&task.log_path, &failure_note(&status));
        }
        remove_lock(&task.lock_path);

        let elapsed = running.started.elapsed().as_secs_f64();
        self.metrics.worker_finished(WorkerKind::Conversion);
        self.metrics
            .record_conversion(if success { "success" } else { "failure" }, Some(elapsed));

        tracing::info!(
            dataset = %task.dataset,
            pid = task.worker_pid,
            success,
            exit_code = ?exit_code,
            elapsed_secs = elapsed,
            "Conversion worker finished"
        );

        ConversionOutcome {
            dataset: task.dataset.clone(),
            success,
            exit_code,
            log_path: task.log_path.clone(),
            synced_manifest: running.synced_manifest.clone(),
        }
    }

    /// Polls a worker left behind by a previous supervisor until it exits.
    ///
    /// Its exit code is unobservable, so success means the synchronized
    /// manifest exists afterwards.
    pub async fn wait_for_pid(&self, entry: LockEntry, synced_manifest: PathBuf) -> ConversionOutcome {
        let (pid, log_path) = match &entry.artifact {
            Some(a) => (a.pid, a.log_path.clone()),
            None => (0, PathBuf::new()),
        };
        self.metrics.worker_started(WorkerKind::Conversion);

        while is_alive(pid) {
            tokio::time::sleep(self.poll_interval).await;
        }

        let success = synced_manifest.exists();
        if !success {
            append_note(
                &log_path,
                &format!("adopted worker pid {} exited without a synchronized manifest", pid),
            );
        }
        remove_lock(&entry.path);

        self.metrics.worker_finished(WorkerKind::Conversion);
        self.metrics
            .record_conversion(if success { "success" } else { "failure" }, None);
        tracing::info!(dataset = %entry.dataset, pid, success, "Adopted conversion worker finished");

        ConversionOutcome {
            dataset: entry.dataset,
            success,
            exit_code: None,
            log_path,
            synced_manifest,
        }
    }

    /// Every lock file currently on disk.
    pub fn scan_locks(&self) -> Result<Vec<LockEntry>, SupervisorError> {
        let dir = self.locks_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "lock") {
                continue;
            }
            let Some(dataset) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let artifact = match LockArtifact::read(&path) {
                Ok(a) => Some(a),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unreadable lock artifact");
                    None
                }
            };
            entries.push(LockEntry {
                dataset,
                path,
                artifact,
            });
        }
        entries.sort_by(|a, b| a.dataset.cmp(&b.dataset));
        Ok(entries)
    }

    /// Removes a lock whose worker is gone, noting it in the worker's log.
    pub fn reclaim(&self, entry: &LockEntry) {
        if let Some(artifact) = &entry.artifact {
            append_note(
                &artifact.log_path,
                &format!(
                    "worker pid {} not running at supervisor startup; conversion rolled back",
                    artifact.pid
                ),
            );
        }
        remove_lock(&entry.path);
        self.metrics.record_conversion("reclaimed", None);
        tracing::warn!(dataset = %entry.dataset, "Reclaimed stale conversion lock");
    }
}

fn failure_note(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(s) => format!("conversion failed: worker {}", s),
        Err(e) => format!("conversion failed: could not await worker: {}", e),
    }
}

fn remove_lock(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove lock artifact");
        }
    }
}

/// Appends a timestamped line to a worker log. Best effort.
pub fn append_note(log_path: &Path, message: &str) {
    if log_path.as_os_str().is_empty() {
        return;
    }
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .and_then(|mut f| {
            writeln!(
                f,
                "[{}] [supervisor] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                message
            )
        });
    if let Err(e) = result {
        tracing::warn!(log = %log_path.display(), error = %e, "Failed to append log note");
    }
}
