//! Episode data produced by extraction.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::bag::JointState;

/// Joint positions, velocities and efforts at one instant. Never contains NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct JointSample {
    /// Log timestamp in nanoseconds.
    pub timestamp: i64,
    pub names: Vec<String>,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub effort: Vec<f64>,
}

impl JointSample {
    pub fn from_message(timestamp: i64, msg: JointState) -> Self {
        Self {
            timestamp,
            names: msg.name,
            position: sanitize(msg.position),
            velocity: sanitize(msg.velocity),
            effort: sanitize(msg.effort),
        }
    }
}

/// Replaces NaN elements with 0.0, leaving every other value untouched.
pub fn sanitize(mut values: Vec<f64>) -> Vec<f64> {
    for v in values.iter_mut() {
        if v.is_nan() {
            *v = 0.0;
        }
    }
    values
}

/// A persisted camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    pub timestamp: i64,
    pub camera: String,
    pub path: PathBuf,
}

/// One assembled capture run.
#[derive(Debug, Clone)]
pub struct Episode {
    pub source: PathBuf,
    /// Zero-based position among the dataset's episodes.
    pub index: usize,
    pub joint_samples: Vec<JointSample>,
    /// Frames per camera, each in log order.
    pub camera_frames: BTreeMap<String, Vec<FrameRef>>,
    /// Camera whose frames advanced the frame counter, if any frame was decoded.
    pub reference_camera: Option<String>,
}

impl Episode {
    pub fn frames(&self, camera: &str) -> &[FrameRef] {
        self.camera_frames
            .get(camera)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of captured instants, i.e. frames on the reference camera.
    pub fn num_frames(&self) -> usize {
        self.reference_camera
            .as_deref()
            .map(|cam| self.frames(cam).len())
            .unwrap_or(0)
    }

    /// Cameras that produced at least one frame.
    pub fn cameras_with_frames(&self) -> impl Iterator<Item = &str> {
        self.camera_frames
            .iter()
            .filter(|(_, frames)| !frames.is_empty())
            .map(|(cam, _)| cam.as_str())
    }

    /// All frames across cameras, ordered by timestamp.
    pub fn frames_in_log_order(&self) -> Vec<&FrameRef> {
        let mut all: Vec<&FrameRef> = self.camera_frames.values().flatten().collect();
        all.sort_by_key(|f| f.timestamp);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_only_touches_nan() {
        let out = sanitize(vec![1.5, f64::NAN, -0.0, f64::INFINITY, f64::NAN]);
        assert_eq!(out[0], 1.5);
        assert_eq!(out[1], 0.0);
        assert!(out[2] == 0.0 && out[2].is_sign_negative());
        assert_eq!(out[3], f64::INFINITY);
        assert!(out.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_joint_sample_sanitizes_every_array() {
        let msg = JointState {
            name: vec!["a".into(), "b".into()],
            position: vec![f64::NAN, 2.0],
            velocity: vec![3.0, f64::NAN],
            effort: vec![f64::NAN, f64::NAN],
            ..Default::default()
        };
        let sample = JointSample::from_message(7, msg);
        assert_eq!(sample.timestamp, 7);
        assert_eq!(sample.position, vec![0.0, 2.0]);
        assert_eq!(sample.velocity, vec![3.0, 0.0]);
        assert_eq!(sample.effort, vec![0.0, 0.0]);
    }
}
