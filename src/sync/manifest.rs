//! JSON documents written by a conversion run.
//!
//! The raw extraction document lists every joint sample and frame per episode;
//! the synchronized manifest lists one entry per reference-camera frame.
//! Camera image paths are keyed by topic name directly on each frame object.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::extract::{Episode, JointSample};
use crate::sync::synchronizer::{SyncedEpisode, SyncedFrame};

/// Suffix appended to the raw document's stem to name the synchronized manifest.
pub const SYNCED_SUFFIX: &str = "_synced.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointStateJson {
    pub name: Vec<String>,
    pub pos: Vec<f64>,
    pub vel: Vec<f64>,
    pub eff: Vec<f64>,
}

impl From<&JointSample> for JointStateJson {
    fn from(sample: &JointSample) -> Self {
        Self {
            name: sample.names.clone(),
            pos: sample.position.clone(),
            vel: sample.velocity.clone(),
            eff: sample.effort.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedFrameJson {
    pub timestamp: i64,
    pub idx: usize,
    pub joint_state: JointStateJson,
    #[serde(flatten)]
    pub images: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedEpisodeJson {
    pub bag: String,
    pub eidx: usize,
    pub num_frames: usize,
    pub frames: Vec<SyncedFrameJson>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedManifest {
    pub bags: String,
    pub estimated_fps: f64,
    pub cameras: Vec<String>,
    pub image_shape: Option<[u32; 3]>,
    pub robots: Vec<String>,
    pub num_episodes: usize,
    pub episodes: Vec<SyncedEpisodeJson>,
}

impl SyncedManifest {
    pub fn joint_names(&self) -> Vec<String> {
        self.episodes
            .iter()
            .flat_map(|e| e.frames.first())
            .map(|f| f.joint_state.name.clone())
            .next()
            .unwrap_or_default()
    }

    pub fn total_frames(&self) -> usize {
        self.episodes.iter().map(|e| e.frames.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawJointJson {
    pub timestamp: i64,
    pub joint_state: JointStateJson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrameJson {
    pub timestamp: i64,
    #[serde(flatten)]
    pub image: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEpisodeJson {
    pub bag: String,
    pub eidx: usize,
    pub num_joint_state: usize,
    pub joint_states: Vec<RawJointJson>,
    pub num_frame: usize,
    pub frames: Vec<RawFrameJson>,
}

impl From<&Episode> for RawEpisodeJson {
    fn from(ep: &Episode) -> Self {
        let joint_states: Vec<RawJointJson> = ep
            .joint_samples
            .iter()
            .map(|s| RawJointJson {
                timestamp: s.timestamp,
                joint_state: s.into(),
            })
            .collect();
        let frames: Vec<RawFrameJson> = ep
            .frames_in_log_order()
            .into_iter()
            .map(|f| RawFrameJson {
                timestamp: f.timestamp,
                image: BTreeMap::from([(f.camera.clone(), path_string(&f.path))]),
            })
            .collect();
        Self {
            bag: path_string(&ep.source),
            eidx: ep.index,
            num_joint_state: joint_states.len(),
            joint_states,
            num_frame: ep.num_frames(),
            frames,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawManifest {
    pub cameras: Vec<String>,
    pub image_shape: Option<[u32; 3]>,
    pub robots: Vec<String>,
    pub num_episodes: usize,
    pub episodes: Vec<RawEpisodeJson>,
}

pub fn synced_frame_json(frame: &SyncedFrame) -> SyncedFrameJson {
    SyncedFrameJson {
        timestamp: frame.timestamp,
        idx: frame.index,
        joint_state: (&frame.joint_state).into(),
        images: frame
            .images
            .iter()
            .map(|(cam, path)| (cam.clone(), path_string(path)))
            .collect(),
    }
}

pub fn synced_episode_json(ep: &SyncedEpisode) -> SyncedEpisodeJson {
    SyncedEpisodeJson {
        bag: path_string(&ep.source),
        eidx: ep.index,
        num_frames: ep.frames.len(),
        frames: ep.frames.iter().map(synced_frame_json).collect(),
    }
}

/// `<dir>/<stem>_synced.json` next to the raw extraction document.
pub fn synced_manifest_path(raw_json: &Path) -> PathBuf {
    let stem = raw_json
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    raw_json.with_file_name(format!("{}{}", stem, SYNCED_SUFFIX))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> std::io::Result<T> {
    let body = fs::read(path)?;
    Ok(serde_json::from_slice(&body)?)
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synced_path_from_raw_json() {
        assert_eq!(
            synced_manifest_path(Path::new("/data/set/ros2bag_msg.json")),
            PathBuf::from("/data/set/ros2bag_msg_synced.json")
        );
    }

    #[test]
    fn test_camera_paths_flatten_into_frame_object() {
        let frame = SyncedFrameJson {
            timestamp: 42,
            idx: 0,
            joint_state: JointStateJson {
                name: vec!["j1".into()],
                pos: vec![0.5],
                vel: vec![],
                eff: vec![],
            },
            images: BTreeMap::from([("/cam/front".to_string(), "f/0.png".to_string())]),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["/cam/front"], "f/0.png");
        assert_eq!(value["joint_state"]["pos"][0], 0.5);

        let back: SyncedFrameJson = serde_json::from_value(value).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_manifest_file_roundtrip_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out_synced.json");
        let manifest = SyncedManifest {
            bags: "/bags".into(),
            estimated_fps: 10.0,
            cameras: vec!["/cam".into()],
            image_shape: Some([2, 2, 3]),
            robots: vec!["/joint_states".into()],
            num_episodes: 1,
            episodes: vec![SyncedEpisodeJson {
                bag: "/bags/ep1".into(),
                eidx: 0,
                num_frames: 0,
                frames: vec![],
            }],
        };
        write_json(&path, &manifest).unwrap();
        let loaded: SyncedManifest = read_json(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.total_frames(), 0);
        assert!(loaded.joint_names().is_empty());
    }
}
