//! Stream synchronization and the manifests it produces.

pub mod manifest;
pub mod synchronizer;

pub use manifest::{
    read_json, synced_episode_json, synced_manifest_path, write_json, RawEpisodeJson,
    RawManifest, SyncedEpisodeJson, SyncedFrameJson, SyncedManifest, SYNCED_SUFFIX,
};
pub use synchronizer::{estimate_fps, nearest_index, StreamSynchronizer, SyncedEpisode, SyncedFrame};
