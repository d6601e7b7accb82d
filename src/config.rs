//! Service configuration.
//!
//! Covers the HTTP bind address, record store location, on-disk layout
//! (blob root, supervisor state, job workspaces), worker and trainer
//! invocation, and outbound timeouts.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the dataset service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    // HTTP
    /// Address the HTTP surface binds to.
    pub bind_addr: String,
    /// Largest accepted upload body, in bytes.
    pub max_upload_bytes: usize,

    // Storage
    /// SQLite connection URL for dataset, weights and job records.
    pub database_url: String,
    /// Root directory of the local blob store (one namespace per dataset).
    pub storage_root: PathBuf,
    /// Directory for lock artifacts and conversion logs.
    pub state_dir: PathBuf,

    // Workers
    /// Program launched as the conversion worker. Defaults to this executable.
    pub worker_program: Option<PathBuf>,
    /// Interval between liveness probes of adopted conversion workers.
    pub adoption_poll_interval: Duration,
    /// Trainer executable.
    pub trainer_program: String,
    /// Arguments placed before the trainer's fixed argument contract.
    pub trainer_args: Vec<String>,
    /// Per-job workspaces (`<jobs_dir>/<job_id>/{output,train.log}`).
    pub jobs_dir: PathBuf,
    /// Local copies of datasets fetched for training.
    pub local_datasets_dir: PathBuf,
    /// Concurrent blob downloads while fetching a dataset.
    pub fetch_concurrency: usize,

    // Collaborators
    /// Remote blob store used by the training side. Local store when unset.
    pub remote_blob_url: Option<String>,
    /// Timeout applied to each outbound HTTP call.
    pub http_timeout: Duration,
    /// Attempts made by health checks before giving up.
    pub health_retries: u32,
    /// Base backoff between health check attempts (multiplied by attempt number).
    pub health_backoff: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            max_upload_bytes: 1024 * 1024 * 1024,

            database_url: "sqlite://./state/forge.db".to_string(),
            storage_root: PathBuf::from("./data"),
            state_dir: PathBuf::from("./state"),

            worker_program: None,
            adoption_poll_interval: Duration::from_secs(2),
            trainer_program: "python".to_string(),
            trainer_args: vec!["-m".to_string(), "lerobot.scripts.train".to_string()],
            jobs_dir: PathBuf::from("./jobs"),
            local_datasets_dir: PathBuf::from("./datasets"),
            fetch_concurrency: 4,

            remote_blob_url: None,
            http_timeout: Duration::from_secs(30),
            health_retries: 3,
            health_backoff: Duration::from_secs(1),
        }
    }
}

impl ServiceConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FORGE_BIND`: HTTP bind address (default: 0.0.0.0:8000)
    /// - `FORGE_MAX_UPLOAD_BYTES`: Upload body limit (default: 1 GiB)
    /// - `DATABASE_URL`: SQLite URL (default: sqlite://./state/forge.db)
    /// - `FORGE_STORAGE_ROOT`: Blob store root (default: ./data)
    /// - `FORGE_STATE_DIR`: Locks and conversion logs (default: ./state)
    /// - `FORGE_WORKER_PROGRAM`: Conversion worker executable (default: current executable)
    /// - `FORGE_ADOPTION_POLL_MS`: Adopted worker poll interval (default: 2000)
    /// - `FORGE_TRAINER_PROGRAM`: Trainer executable (default: python)
    /// - `FORGE_TRAINER_ARGS`: Whitespace-separated trainer prefix args (default: -m lerobot.scripts.train)
    /// - `FORGE_JOBS_DIR`: Job workspaces (default: ./jobs)
    /// - `FORGE_LOCAL_DATASETS_DIR`: Local dataset copies (default: ./datasets)
    /// - `FORGE_FETCH_CONCURRENCY`: Parallel dataset downloads (default: 4)
    /// - `FORGE_REMOTE_BLOB_URL`: Remote blob store base URL (default: unset)
    /// - `FORGE_HTTP_TIMEOUT_SECS`: Outbound HTTP timeout (default: 30)
    /// - `FORGE_HEALTH_RETRIES`: Health check attempts (default: 3)
    /// - `FORGE_HEALTH_BACKOFF_MS`: Health check base backoff (default: 1000)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FORGE_BIND") {
            config.bind_addr = val;
        }

        if let Ok(val) = std::env::var("FORGE_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = parse_env_value(&val, "FORGE_MAX_UPLOAD_BYTES")?;
        }

        if let Ok(val) = std::env::var("DATABASE_URL") {
            config.database_url = val;
        }

        if let Ok(val) = std::env::var("FORGE_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("FORGE_STATE_DIR") {
            config.state_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("FORGE_WORKER_PROGRAM") {
            config.worker_program = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("FORGE_ADOPTION_POLL_MS") {
            let ms: u64 = parse_env_value(&val, "FORGE_ADOPTION_POLL_MS")?;
            config.adoption_poll_interval = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("FORGE_TRAINER_PROGRAM") {
            config.trainer_program = val;
        }

        if let Ok(val) = std::env::var("FORGE_TRAINER_ARGS") {
            config.trainer_args = val.split_whitespace().map(str::to_string).collect();
        }

        if let Ok(val) = std::env::var("FORGE_JOBS_DIR") {
            config.jobs_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("FORGE_LOCAL_DATASETS_DIR") {
            config.local_datasets_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("FORGE_FETCH_CONCURRENCY") {
            config.fetch_concurrency = parse_env_value(&val, "FORGE_FETCH_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("FORGE_REMOTE_BLOB_URL") {
            if !val.trim().is_empty() {
                config.remote_blob_url = Some(val);
            }
        }

        if let Ok(val) = std::env::var("FORGE_HTTP_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FORGE_HTTP_TIMEOUT_SECS")?;
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("FORGE_HEALTH_RETRIES") {
            config.health_retries = parse_env_value(&val, "FORGE_HEALTH_RETRIES")?;
        }

        if let Ok(val) = std::env::var("FORGE_HEALTH_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "FORGE_HEALTH_BACKOFF_MS")?;
            config.health_backoff = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "bind_addr cannot be empty".to_string(),
            ));
        }

        if self.max_upload_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_upload_bytes must be greater than 0".to_string(),
            ));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.adoption_poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "adoption_poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.trainer_program.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "trainer_program cannot be empty".to_string(),
            ));
        }

        if self.fetch_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "fetch_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.http_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "http_timeout must be greater than 0".to_string(),
            ));
        }

        if self.health_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "health_retries must be at least 1".to_string(),
            ));
        }

        // Training workspaces are deleted after each job.
        for (key, dir) in [
            ("local_datasets_dir", &self.local_datasets_dir),
            ("jobs_dir", &self.jobs_dir),
        ] {
            if overlaps(dir, &self.storage_root) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} ({}) must not overlap storage_root ({})",
                    key,
                    dir.display(),
                    self.storage_root.display()
                )));
            }
        }

        Ok(())
    }

    /// Builder method to set the bind address.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the blob store root.
    pub fn with_storage_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_root = path.into();
        self
    }

    /// Builder method to set the supervisor state directory.
    pub fn with_state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_dir = path.into();
        self
    }

    /// Builder method to set the conversion worker program.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    /// Builder method to set the adopted worker poll interval.
    pub fn with_adoption_poll_interval(mut self, interval: Duration) -> Self {
        self.adoption_poll_interval = interval;
        self
    }

    /// Builder method to set the trainer program and its prefix arguments.
    pub fn with_trainer(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.trainer_program = program.into();
        self.trainer_args = args;
        self
    }

    /// Builder method to set the job workspace directory.
    pub fn with_jobs_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.jobs_dir = path.into();
        self
    }

    /// Builder method to set the local dataset directory.
    pub fn with_local_datasets_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_datasets_dir = path.into();
        self
    }

    /// Builder method to set the fetch concurrency.
    pub fn with_fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n;
        self
    }

    /// Builder method to set the remote blob store URL.
    pub fn with_remote_blob_url(mut self, url: impl Into<String>) -> Self {
        self.remote_blob_url = Some(url.into());
        self
    }

    /// Builder method to set the outbound HTTP timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Builder method to set the health check retry policy.
    pub fn with_health_policy(mut self, retries: u32, backoff: Duration) -> Self {
        self.health_retries = retries;
        self.health_backoff = backoff;
        self
    }

    /// Places every on-disk location under `root`. Handy for tests and single-node setups.
    pub fn rooted_at(self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let db = root.join("forge.db");
        self.with_database_url(format!("sqlite://{}", db.display()))
            .with_storage_root(root.join("data"))
            .with_state_dir(root.join("state"))
            .with_jobs_dir(root.join("jobs"))
            .with_local_datasets_dir(root.join("datasets"))
    }
}

/// Whether one directory contains the other (compared component-wise).
fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
