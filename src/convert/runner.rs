//! End-to-end conversion run: extraction, synchronization and dataset output.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::bag::{discover_episodes, Db3Log};
use crate::convert::lerobot::{self, LeRobotSummary};
use crate::error::ConversionError;
use crate::extract::{Episode, EpisodeAssembler, ExtractionContext};
use crate::sync::{
    synced_episode_json, synced_manifest_path, write_json, RawEpisodeJson, RawManifest,
    StreamSynchronizer, SyncedEpisode, SyncedManifest,
};

/// Name of the dataset output directory inside a dataset namespace.
pub const LEROBOT_DIR: &str = "lerobot";
/// Raw extraction document inside a dataset namespace.
pub const RAW_JSON_NAME: &str = "ros2bag_msg.json";
/// Frame directory inside a dataset namespace.
pub const FRAMES_DIR: &str = "frames";
/// Frame rate assumed when the estimate is unusable.
pub const DEFAULT_FPS: f64 = 30.0;

/// Inputs and outputs of one conversion run.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub bag_root: PathBuf,
    pub output: PathBuf,
    pub json: PathBuf,
    pub images: PathBuf,
    /// Defaults to `<json stem>_synced.json` beside `json`.
    pub synced: Option<PathBuf>,
    pub default_fps: f64,
}

impl ConversionOptions {
    /// Standard layout for a dataset namespace rooted at `root`.
    pub fn for_namespace(root: &Path) -> Self {
        Self {
            bag_root: root.to_path_buf(),
            output: root.join(LEROBOT_DIR),
            json: root.join(RAW_JSON_NAME),
            images: root.join(FRAMES_DIR),
            synced: None,
            default_fps: DEFAULT_FPS,
        }
    }

    pub fn synced_path(&self) -> PathBuf {
        self.synced
            .clone()
            .unwrap_or_else(|| synced_manifest_path(&self.json))
    }
}

#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub episodes: usize,
    pub synced_frames: usize,
    pub cameras: Vec<String>,
    pub estimated_fps: f64,
    pub dataset: LeRobotSummary,
    pub decode_failures: usize,
    /// Previous output directory, if one was moved aside.
    pub rotated_output: Option<PathBuf>,
    pub synced_manifest: PathBuf,
}

/// Moves an existing `output` directory to the first free `<output>N` sibling.
pub fn rotate_existing_output(output: &Path) -> std::io::Result<Option<PathBuf>> {
    if !output.is_dir() {
        return Ok(None);
    }
    let base = output.as_os_str().to_string_lossy().into_owned();
    let target = (0..)
        .map(|n| PathBuf::from(format!("{}{}", base, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| PathBuf::from(format!("{}.old", base)));

    std::fs::rename(output, &target)?;
    tracing::info!(
        from = %output.display(),
        to = %target.display(),
        "Moved existing dataset output aside"
    );
    Ok(Some(target))
}

/// Runs extraction and synchronization over every episode under `opts.bag_root`,
/// then writes the raw document, the synchronized manifest and the dataset.
pub async fn run_conversion(opts: &ConversionOptions) -> Result<ConversionReport, ConversionError> {
    let started = Instant::now();
    if !opts.bag_root.is_dir() {
        return Err(ConversionError::NotADirectory(
            opts.bag_root.display().to_string(),
        ));
    }

    let rotated_output = rotate_existing_output(&opts.output)?;
    let episode_dirs = discover_episodes(&opts.bag_root)?;
    let Some(first_dir) = episode_dirs.first() else {
        return Err(ConversionError::NoEpisodes(opts.bag_root.display().to_string()));
    };

    tracing::info!(
        bag_root = %opts.bag_root.display(),
        episodes = episode_dirs.len(),
        "Starting conversion"
    );

    let first = Db3Log::open(first_dir).await?;
    let mut ctx = ExtractionContext::discover(&first, &opts.images).await?;

    let mut episodes: Vec<Episode> = Vec::with_capacity(episode_dirs.len());
    let mut pending = Some(first);
    for dir in &episode_dirs {
        let mut log = match pending.take() {
            Some(log) => log,
            None => Db3Log::open(dir).await?,
        };
        let episode = EpisodeAssembler::new(&mut ctx, dir).assemble(&mut log).await;
        log.close().await;
        episodes.push(episode?);
    }

    let robots = vec![ctx.classification.joint_topic.clone()];
    let raw = RawManifest {
        cameras: ctx.cameras.clone(),
        image_shape: ctx.image_shape,
        robots: robots.clone(),
        num_episodes: episodes.len(),
        episodes: episodes.iter().map(RawEpisodeJson::from).collect(),
    };
    write_json(&opts.json, &raw)?;

    let (synced, estimated_fps) = match ctx.reference_camera() {
        Some(reference) => {
            let mut sync = StreamSynchronizer::new(reference, ctx.cameras.clone());
            let synced: Vec<SyncedEpisode> = episodes.iter().map(|ep| sync.synchronize(ep)).collect();
            (synced, sync.estimated_fps())
        }
        None => {
            tracing::warn!("No camera produced frames; synchronized episodes will be empty");
            let empty = episodes
                .iter()
                .map(|ep| SyncedEpisode {
                    source: ep.source.clone(),
                    index: ep.index,
                    frames: Vec::new(),
                })
                .collect();
            (empty, 0.0)
        }
    };

    let manifest = SyncedManifest {
        bags: opts.bag_root.to_string_lossy().into_owned(),
        estimated_fps,
        cameras: ctx.cameras.clone(),
        image_shape: ctx.image_shape,
        robots,
        num_episodes: episodes.len(),
        episodes: synced.iter().map(synced_episode_json).collect(),
    };
    let synced_path = opts.synced_path();
    write_json(&synced_path, &manifest)?;

    let dataset = lerobot::write_dataset(&manifest, &opts.output, opts.default_fps)?;

    tracing::info!(
        episodes = episodes.len(),
        frames = dataset.total_frames,
        fps = dataset.fps,
        decode_failures = ctx.decode_failures,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Conversion complete"
    );

    Ok(ConversionReport {
        episodes: episodes.len(),
        synced_frames: manifest.total_frames(),
        cameras: ctx.cameras,
        estimated_fps,
        dataset,
        decode_failures: ctx.decode_failures,
        rotated_output,
        synced_manifest: synced_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_picks_first_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("lerobot");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::create_dir_all(dir.path().join("lerobot0")).unwrap();

        let moved = rotate_existing_output(&out).unwrap();
        assert_eq!(moved, Some(dir.path().join("lerobot1")));
        assert!(!out.exists());
        assert!(rotate_existing_output(&out).unwrap().is_none());
    }

    #[test]
    fn test_namespace_layout() {
        let opts = ConversionOptions::for_namespace(Path::new("/data/demo"));
        assert_eq!(opts.output, PathBuf::from("/data/demo/lerobot"));
        assert_eq!(
            opts.synced_path(),
            PathBuf::from("/data/demo/ros2bag_msg_synced.json")
        );
        assert_eq!(opts.default_fps, DEFAULT_FPS);
    }

    #[tokio::test]
    async fn test_missing_bag_root_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ConversionOptions::for_namespace(&dir.path().join("absent"));
        let err = run_conversion(&opts).await.unwrap_err();
        assert!(matches!(err, ConversionError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_empty_bag_root_has_no_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ConversionOptions::for_namespace(dir.path());
        let err = run_conversion(&opts).await.unwrap_err();
        assert!(matches!(err, ConversionError::NoEpisodes(_)));
    }
}
