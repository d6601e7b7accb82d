//! Episode assembly.
//!
//! [`ExtractionContext`] carries everything that persists across the episodes
//! of one conversion run: topic classification, the dataset-wide camera list,
//! the canonical image shape and output locations. It is owned by the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::bag::{classify, CameraEncoding, JointState, MessageLog, RawMessage, TopicClassification};
use crate::error::{BagError, DecodeError};
use crate::extract::frames::{decode_frame, frame_path, frame_shape, save_png};
use crate::extract::types::{Episode, FrameRef, JointSample};

/// Per-run extraction state.
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub classification: TopicClassification,
    /// Cameras still considered part of the dataset. Narrows when an episode lacks some.
    pub cameras: Vec<String>,
    pub image_dir: PathBuf,
    /// `[height, width, channels]`, fixed by the first decoded frame.
    pub image_shape: Option<[u32; 3]>,
    pub episodes_assembled: usize,
    /// Frames and joint samples skipped because they failed to decode.
    pub decode_failures: usize,
}

impl ExtractionContext {
    /// Classifies topics from the dataset's first episode.
    pub async fn discover<L: MessageLog + ?Sized>(
        first_episode: &L,
        image_dir: impl Into<PathBuf>,
    ) -> Result<Self, BagError> {
        let active = first_episode.active_topics().await?;
        let classification = classify(first_episode.topics(), &active)?;
        let cameras = classification.camera_names();

        tracing::info!(
            joint_topic = %classification.joint_topic,
            cameras = ?cameras,
            "Classified bag topics"
        );

        Ok(Self {
            classification,
            cameras,
            image_dir: image_dir.into(),
            image_shape: None,
            episodes_assembled: 0,
            decode_failures: 0,
        })
    }

    fn camera_encoding(&self, topic: &str) -> Option<CameraEncoding> {
        if !self.cameras.iter().any(|c| c == topic) {
            return None;
        }
        self.classification.camera(topic).map(|c| c.encoding)
    }

    /// Reference camera for synchronization: the first remaining dataset camera.
    pub fn reference_camera(&self) -> Option<&str> {
        self.cameras.first().map(String::as_str)
    }
}

/// Builds one [`Episode`] from a message log.
pub struct EpisodeAssembler<'a> {
    ctx: &'a mut ExtractionContext,
    episode: Episode,
    /// Reference-camera frames seen so far in this episode.
    reference_ticks: usize,
}

impl<'a> EpisodeAssembler<'a> {
    pub fn new(ctx: &'a mut ExtractionContext, source: &Path) -> Self {
        let index = ctx.episodes_assembled;
        Self {
            ctx,
            episode: Episode {
                source: source.to_path_buf(),
                index,
                joint_samples: Vec::new(),
                camera_frames: BTreeMap::new(),
                reference_camera: None,
            },
            reference_ticks: 0,
        }
    }

    /// Drains `log` and returns the assembled episode.
    pub async fn assemble<L: MessageLog + ?Sized>(mut self, log: &mut L) -> Result<Episode, BagError> {
        while let Some(msg) = log.next_message().await? {
            self.accept(msg);
        }
        Ok(self.finish())
    }

    /// Routes one message to the joint-state or camera path.
    pub fn accept(&mut self, msg: RawMessage) {
        if msg.topic == self.ctx.classification.joint_topic {
            self.accept_joint_state(msg);
        } else if let Some(encoding) = self.ctx.camera_encoding(&msg.topic) {
            if let Err(e) = self.accept_frame(encoding, &msg) {
                self.ctx.decode_failures += 1;
                tracing::warn!(
                    topic = %msg.topic,
                    timestamp = msg.timestamp,
                    episode = self.episode.index,
                    error = %e,
                    "Skipping camera frame"
                );
            }
        }
    }

    fn accept_joint_state(&mut self, msg: RawMessage) {
        match JointState::decode(&msg.data) {
            Ok(state) => self
                .episode
                .joint_samples
                .push(JointSample::from_message(msg.timestamp, state)),
            Err(e) => {
                self.ctx.decode_failures += 1;
                tracing::warn!(
                    topic = %msg.topic,
                    timestamp = msg.timestamp,
                    error = %e,
                    "Skipping joint state"
                );
            }
        }
    }

    fn accept_frame(&mut self, encoding: CameraEncoding, msg: &RawMessage) -> Result<(), DecodeError> {
        let img = decode_frame(encoding, &msg.data)?;

        let shape = frame_shape(&img);
        match self.ctx.image_shape {
            Some(expected) if expected != shape => {
                return Err(DecodeError::ShapeMismatch {
                    expected,
                    actual: shape,
                })
            }
            Some(_) => {}
            None => self.ctx.image_shape = Some(shape),
        }

        let reference = self
            .episode
            .reference_camera
            .get_or_insert_with(|| msg.topic.clone());
        if *reference == msg.topic {
            self.reference_ticks += 1;
        }
        let counter = self.reference_ticks.saturating_sub(1);

        let path = frame_path(&self.ctx.image_dir, self.episode.index, &msg.topic, counter);
        save_png(&img, &path)?;

        self.episode
            .camera_frames
            .entry(msg.topic.clone())
            .or_default()
            .push(FrameRef {
                timestamp: msg.timestamp,
                camera: msg.topic.clone(),
                path,
            });
        Ok(())
    }

    /// Closes the episode and narrows the dataset camera list if some cameras stayed silent.
    pub fn finish(self) -> Episode {
        let produced: Vec<&str> = self.episode.cameras_with_frames().collect();
        if !produced.is_empty() && produced.len() < self.ctx.cameras.len() {
            let narrowed: Vec<String> = self
                .ctx
                .cameras
                .iter()
                .filter(|c| produced.contains(&c.as_str()))
                .cloned()
                .collect();
            tracing::warn!(
                episode = self.episode.index,
                before = ?self.ctx.cameras,
                after = ?narrowed,
                "Narrowing dataset cameras to those with frames"
            );
            self.ctx.cameras = narrowed;
        }

        self.ctx.episodes_assembled += 1;
        tracing::info!(
            episode = self.episode.index,
            joint_samples = self.episode.joint_samples.len(),
            frames = self.episode.num_frames(),
            "Episode assembled"
        );
        self.episode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{CameraTopic, Header, RawImage};

    fn context(dir: &Path, cameras: &[&str]) -> ExtractionContext {
        ExtractionContext {
            classification: TopicClassification {
                joint_topic: "/joint_states".into(),
                cameras: cameras
                    .iter()
                    .map(|c| CameraTopic {
                        name: c.to_string(),
                        encoding: CameraEncoding::Raw,
                    })
                    .collect(),
            },
            cameras: cameras.iter().map(|c| c.to_string()).collect(),
            image_dir: dir.to_path_buf(),
            image_shape: None,
            episodes_assembled: 0,
            decode_failures: 0,
        }
    }

    fn frame(topic: &str, ts: i64, width: u32) -> RawMessage {
        let img = RawImage {
            header: Header::at(ts, "cam"),
            height: 2,
            width,
            encoding: "rgb8".into(),
            is_bigendian: 0,
            step: width * 3,
            data: vec![128; (width * 6) as usize],
        };
        RawMessage {
            topic: topic.into(),
            timestamp: ts,
            data: img.encode(true),
        }
    }

    fn joints(ts: i64) -> RawMessage {
        let msg = JointState {
            name: vec!["j1".into()],
            position: vec![f64::NAN],
            ..Default::default()
        };
        RawMessage {
            topic: "/joint_states".into(),
            timestamp: ts,
            data: msg.encode(true),
        }
    }

    #[test]
    fn test_counter_advances_only_on_reference_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), &["/a", "/b"]);

        let mut asm = EpisodeAssembler::new(&mut ctx, Path::new("ep"));
        asm.accept(frame("/b", 1, 2));
        asm.accept(frame("/a", 2, 2));
        asm.accept(frame("/b", 3, 2));
        asm.accept(frame("/b", 4, 2));
        asm.accept(joints(5));
        let ep = asm.finish();

        // "/b" produced first, so it is this episode's counter reference.
        assert_eq!(ep.reference_camera.as_deref(), Some("/b"));
        let names: Vec<String> = ep
            .frames("/b")
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_000000.png", "frame_000001.png", "frame_000002.png"]);
        assert!(ep.frames("/a")[0].path.ends_with("episode1/a/frame_000000.png"));
        assert_eq!(ep.joint_samples[0].position, vec![0.0]);
        assert_eq!(ctx.episodes_assembled, 1);
    }

    #[test]
    fn test_shape_mismatch_skips_frame_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), &["/a"]);

        let mut asm = EpisodeAssembler::new(&mut ctx, Path::new("ep"));
        asm.accept(frame("/a", 1, 2));
        asm.accept(frame("/a", 2, 4));
        asm.accept(RawMessage {
            topic: "/a".into(),
            timestamp: 3,
            data: vec![0, 1, 0],
        });
        asm.accept(frame("/a", 4, 2));
        let ep = asm.finish();

        assert_eq!(ep.num_frames(), 2);
        assert_eq!(ctx.image_shape, Some([2, 2, 3]));
        assert_eq!(ctx.decode_failures, 2);
    }

    #[test]
    fn test_silent_camera_narrows_dataset_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), &["/a", "/b", "/c"]);

        let mut asm = EpisodeAssembler::new(&mut ctx, Path::new("ep"));
        asm.accept(frame("/c", 1, 2));
        asm.accept(frame("/a", 2, 2));
        asm.finish();

        assert_eq!(ctx.cameras, vec!["/a", "/c"]);
        assert_eq!(ctx.reference_camera(), Some("/a"));
    }

    #[test]
    fn test_episode_without_frames_keeps_camera_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), &["/a", "/b"]);

        let mut asm = EpisodeAssembler::new(&mut ctx, Path::new("ep"));
        asm.accept(joints(1));
        let ep = asm.finish();

        assert_eq!(ep.num_frames(), 0);
        assert_eq!(ctx.cameras.len(), 2);
    }
}
