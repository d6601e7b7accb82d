//! Nearest-timestamp alignment of joint and camera streams onto a reference camera.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::extract::{Episode, JointSample};

/// One synchronized instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedFrame {
    pub index: usize,
    /// Reference camera timestamp.
    pub timestamp: i64,
    pub joint_state: JointSample,
    pub images: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SyncedEpisode {
    pub source: PathBuf,
    pub index: usize,
    pub frames: Vec<SyncedFrame>,
}

/// Index of the candidate closest to `target`; ties resolve to the lowest index.
///
/// Uses binary search when `candidates` is sorted, a linear scan otherwise.
pub fn nearest_index(candidates: &[i64], target: i64) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    if candidates.windows(2).all(|w| w[0] <= w[1]) {
        let right = candidates.partition_point(|&t| t < target);
        if right == 0 {
            return Some(0);
        }
        let left_value = candidates[right - 1];
        // First occurrence of the left neighbour's value.
        let left = candidates.partition_point(|&t| t < left_value);
        if right == candidates.len() {
            return Some(left);
        }
        let d_left = target.abs_diff(left_value);
        let d_right = candidates[right].abs_diff(target);
        return Some(if d_left <= d_right { left } else { right });
    }

    let mut best = 0;
    let mut best_dist = candidates[0].abs_diff(target);
    for (i, &t) in candidates.iter().enumerate().skip(1) {
        let dist = t.abs_diff(target);
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    Some(best)
}

/// `(n - 1) / duration_seconds` over a synced sequence; 0.0 for fewer than two
/// frames or a non-positive duration.
pub fn estimate_fps(frames: &[SyncedFrame]) -> f64 {
    let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
        return 0.0;
    };
    if frames.len() < 2 {
        return 0.0;
    }
    let duration = (last.timestamp - first.timestamp) as f64 / 1e9;
    if duration > 0.0 {
        (frames.len() - 1) as f64 / duration
    } else {
        0.0
    }
}

/// Aligns episodes to a reference camera and tracks the dataset frame-rate estimate.
///
/// The estimate comes from the first episode with at least two synced frames
/// and is not revised afterwards.
pub struct StreamSynchronizer {
    reference: String,
    cameras: Vec<String>,
    estimated_fps: Option<f64>,
}

impl StreamSynchronizer {
    pub fn new(reference: impl Into<String>, cameras: Vec<String>) -> Self {
        Self {
            reference: reference.into(),
            cameras,
            estimated_fps: None,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Frame-rate estimate, 0.0 until an episode with two or more frames was seen.
    pub fn estimated_fps(&self) -> f64 {
        self.estimated_fps.unwrap_or(0.0)
    }

    pub fn synchronize(&mut self, episode: &Episode) -> SyncedEpisode {
        let mut synced = SyncedEpisode {
            source: episode.source.clone(),
            index: episode.index,
            frames: Vec::new(),
        };

        if episode.joint_samples.is_empty() {
            tracing::warn!(
                episode = episode.index,
                "Episode has no joint-state samples; no frames synchronized"
            );
            return synced;
        }

        let joint_ts: Vec<i64> = episode.joint_samples.iter().map(|s| s.timestamp).collect();
        let camera_ts: Vec<(&str, Vec<i64>)> = self
            .cameras
            .iter()
            .map(|cam| {
                let ts = episode.frames(cam).iter().map(|f| f.timestamp).collect();
                (cam.as_str(), ts)
            })
            .collect();

        for reference in episode.frames(&self.reference) {
            let Some(j) = nearest_index(&joint_ts, reference.timestamp) else {
                continue;
            };

            let mut images = BTreeMap::new();
            for (cam, ts) in &camera_ts {
                if let Some(i) = nearest_index(ts, reference.timestamp) {
                    images.insert(cam.to_string(), episode.frames(cam)[i].path.clone());
                }
            }

            synced.frames.push(SyncedFrame {
                index: synced.frames.len(),
                timestamp: reference.timestamp,
                joint_state: episode.joint_samples[j].clone(),
                images,
            });
        }

        if self.estimated_fps.is_none() && synced.frames.len() >= 2 {
            let fps = estimate_fps(&synced.frames);
            tracing::info!(episode = episode.index, fps, "Estimated capture rate");
            self.estimated_fps = Some(fps);
        }

        synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FrameRef;

    fn sample(ts: i64) -> JointSample {
        JointSample {
            timestamp: ts,
            names: vec!["j".into()],
            position: vec![ts as f64],
            velocity: vec![],
            effort: vec![],
        }
    }

    fn frames(cam: &str, stamps: &[i64]) -> Vec<FrameRef> {
        stamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| FrameRef {
                timestamp: ts,
                camera: cam.into(),
                path: PathBuf::from(format!("{}/{}.png", cam, i)),
            })
            .collect()
    }

    fn episode(joints: &[i64], cams: &[(&str, &[i64])]) -> Episode {
        Episode {
            source: PathBuf::from("ep"),
            index: 0,
            joint_samples: joints.iter().map(|&t| sample(t)).collect(),
            camera_frames: cams
                .iter()
                .map(|(c, ts)| (c.to_string(), frames(c, ts)))
                .collect(),
            reference_camera: cams.first().map(|(c, _)| c.to_string()),
        }
    }

    #[test]
    fn test_nearest_ties_resolve_to_lowest_index() {
        assert_eq!(nearest_index(&[0, 10], 5), Some(0));
        assert_eq!(nearest_index(&[0, 10, 10, 20], 12), Some(1));
        assert_eq!(nearest_index(&[5, 5, 5], 100), Some(0));
        assert_eq!(nearest_index(&[5, 5, 5], -100), Some(0));
        assert_eq!(nearest_index(&[], 1), None);
    }

    #[test]
    fn test_nearest_unsorted_matches_linear_minimum() {
        let candidates = [30, 10, 20, 10];
        assert_eq!(nearest_index(&candidates, 14), Some(1));
        assert_eq!(nearest_index(&candidates, 15), Some(1));
        assert_eq!(nearest_index(&candidates, 26), Some(0));
    }

    #[test]
    fn test_sorted_and_linear_agree() {
        let sorted = [-7, -2, 0, 0, 3, 9, 9, 15];
        for target in -12..20 {
            let fast = nearest_index(&sorted, target).unwrap();
            let best = sorted.iter().map(|t| t.abs_diff(target)).min().unwrap();
            let slow = sorted.iter().position(|t| t.abs_diff(target) == best).unwrap();
            assert_eq!(fast, slow, "target {}", target);
        }
    }

    #[test]
    fn test_one_second_apart_is_one_fps() {
        let ep = episode(&[0], &[("/cam", &[0, 1_000_000_000])]);
        let mut sync = StreamSynchronizer::new("/cam", vec!["/cam".into()]);
        let out = sync.synchronize(&ep);
        assert_eq!(out.frames.len(), 2);
        assert_eq!(sync.estimated_fps(), 1.0);
        assert_eq!(estimate_fps(&out.frames), 1.0);
    }

    #[test]
    fn test_identical_timestamps_give_zero_fps() {
        let ep = episode(&[0], &[("/cam", &[5, 5, 5])]);
        let mut sync = StreamSynchronizer::new("/cam", vec!["/cam".into()]);
        sync.synchronize(&ep);
        assert_eq!(sync.estimated_fps(), 0.0);
    }

    #[test]
    fn test_fps_fixed_by_first_qualifying_episode() {
        let mut sync = StreamSynchronizer::new("/cam", vec!["/cam".into()]);
        sync.synchronize(&episode(&[0], &[("/cam", &[0])]));
        assert_eq!(sync.estimated_fps(), 0.0);

        sync.synchronize(&episode(&[0], &[("/cam", &[0, 500_000_000])]));
        assert_eq!(sync.estimated_fps(), 2.0);

        sync.synchronize(&episode(&[0], &[("/cam", &[0, 100_000_000])]));
        assert_eq!(sync.estimated_fps(), 2.0);
    }

    #[test]
    fn test_streams_align_to_reference() {
        let ep = episode(
            &[0, 40, 90],
            &[("/front", &[10, 50, 100]), ("/wrist", &[0, 45, 48, 120])],
        );
        let mut sync = StreamSynchronizer::new("/front", vec!["/front".into(), "/wrist".into()]);
        let out = sync.synchronize(&ep);

        let indices: Vec<usize> = out.frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(out.frames[0].joint_state.timestamp, 0);
        assert_eq!(out.frames[1].joint_state.timestamp, 40);
        assert_eq!(out.frames[2].joint_state.timestamp, 90);
        assert_eq!(out.frames[1].images["/wrist"], PathBuf::from("/wrist/2.png"));
        assert_eq!(out.frames[2].images["/wrist"], PathBuf::from("/wrist/3.png"));
        assert_eq!(out.frames[2].images["/front"], PathBuf::from("/front/2.png"));
    }

    #[test]
    fn test_no_joint_samples_yields_no_frames() {
        let ep = episode(&[], &[("/cam", &[0, 10])]);
        let mut sync = StreamSynchronizer::new("/cam", vec!["/cam".into()]);
        assert!(sync.synchronize(&ep).frames.is_empty());
    }
}
