//! Training request and trainer invocation.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_steps() -> u64 {
    100_000
}

fn default_repo_id() -> String {
    "rbs_ros2bag".to_string()
}

fn default_use_vae() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    #[default]
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

/// A request to train a policy on a stored dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    pub dataset_name: String,
    #[serde(default = "default_steps")]
    pub steps: u64,
    #[serde(default)]
    pub device: Device,
    #[serde(default = "default_repo_id")]
    pub repo_id: String,
    #[serde(default = "default_use_vae")]
    pub use_vae: bool,
    /// Dataset root handed to the trainer instead of the fetched local copy.
    #[serde(default)]
    pub root_override: Option<String>,
}

impl TrainRequest {
    pub fn new(dataset_name: impl Into<String>) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            steps: default_steps(),
            device: Device::default(),
            repo_id: default_repo_id(),
            use_vae: default_use_vae(),
            root_override: None,
        }
    }
}

/// Trainer executable plus the arguments placed before the fixed contract.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerCommand {
    pub program: String,
    pub prefix: Vec<String>,
}

impl TrainerCommand {
    pub fn new(program: impl Into<String>, prefix: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix,
        }
    }

    pub fn arguments(
        &self,
        req: &TrainRequest,
        dataset_root: &Path,
        output_dir: &Path,
        job_id: &str,
    ) -> Vec<String> {
        let root = req
            .root_override
            .clone()
            .unwrap_or_else(|| dataset_root.display().to_string());

        let mut args = self.prefix.clone();
        args.extend([
            "--dataset.repo_id".to_string(),
            req.repo_id.clone(),
            "--dataset.root".to_string(),
            root,
            "--policy.type=act".to_string(),
            format!("--output_dir={}", output_dir.display()),
            format!("--job_name={}", job_id),
            format!("--policy.device={}", req.device.as_str()),
            format!("--policy.use_vae={}", req.use_vae),
            format!("--steps={}", req.steps),
            format!("--policy.repo_id={}", req.repo_id),
        ]);
        args
    }

    /// Shell-like rendering for the job log.
    pub fn display(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
