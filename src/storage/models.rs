//! Records persisted in the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetStatus {
    #[serde(rename = "creating")]
    Creating,
    #[serde(rename = "save")]
    Save,
    #[serde(rename = "conversion")]
    Conversion,
    #[serde(rename = "store")]
    Store,
    #[serde(rename = "at work")]
    AtWork,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Save => "save",
            Self::Conversion => "conversion",
            Self::Store => "store",
            Self::AtWork => "at work",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(Self::Creating),
            "save" => Some(Self::Save),
            "conversion" => Some(Self::Conversion),
            "store" => Some(Self::Store),
            "at work" => Some(Self::AtWork),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub name: String,
    pub num_episodes: i64,
    pub source_format: String,
    pub work_format: String,
    pub status: DatasetStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DatasetRecord {
    /// A freshly created rosbag dataset awaiting uploads.
    pub fn new_rosbag(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            num_episodes: 0,
            source_format: "rosbag".to_string(),
            work_format: "lerobot".to_string(),
            status: DatasetStatus::Creating,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A trained policy archive produced by a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsRecord {
    /// Job id of the producing training run.
    pub name: String,
    pub dataset: String,
    pub steps: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Finished and failed jobs are never revived.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub job_id: String,
    pub dataset: String,
    pub state: JobState,
    /// Percent complete, 0 to 100.
    pub progress: f64,
    pub message: String,
    /// The submitted request as JSON.
    pub request: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied to a non-terminal job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub state: Option<JobState>,
    pub progress: Option<f64>,
    pub message: Option<String>,
}

impl JobUpdate {
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }
}
