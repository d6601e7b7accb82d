//! Frame extraction and episode assembly.
//!
//! Turns one episode's message log into an [`Episode`]: sanitized joint
//! samples plus per-camera PNG frames on disk.

pub mod episode;
pub mod frames;
pub mod types;

pub use episode::{EpisodeAssembler, ExtractionContext};
pub use frames::{camera_dir_name, decode_frame, frame_path};
pub use types::{sanitize, Episode, FrameRef, JointSample};
