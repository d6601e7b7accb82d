//! LeRobot dataset layout writer.
//!
//! Produces `meta/info.json`, `meta/tasks.jsonl`, `meta/episodes.jsonl` and one
//! `data/chunk-000/episode_{index:06}.parquet` table per synchronized episode.
//! Camera columns hold the PNG frame paths written during extraction, relative
//! to the parent of the output directory (the dataset namespace) when the
//! frames live under it, so a fetched namespace is self-contained.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float32Builder, Int64Builder, ListBuilder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::{json, Map, Value};

use crate::error::ConversionError;
use crate::sync::{SyncedEpisodeJson, SyncedManifest};

pub const DEFAULT_TASK: &str = "default_task";
pub const CODEBASE_VERSION: &str = "v2.1";
const CHUNKS_SIZE: usize = 1000;

/// Feature key for a camera topic: leading `/` dropped, `/` replaced by `.`.
pub fn feature_name(topic: &str) -> String {
    topic.trim_start_matches('/').replace('/', ".")
}

/// Frame rate used for the dataset: the estimate, or `fallback` when below 0.1.
pub fn effective_fps(estimated: f64, fallback: f64) -> f64 {
    if estimated < 0.1 {
        fallback
    } else {
        estimated
    }
}

fn position_list_field(name: &str) -> Field {
    Field::new_list(name, Field::new("item", DataType::Float32, true), false)
}

/// Arrow schema of one episode table.
pub fn episode_schema(cameras: &[String]) -> Schema {
    let mut fields = vec![
        position_list_field("observation.state"),
        position_list_field("action"),
        Field::new("timestamp", DataType::Float32, false),
        Field::new("frame_index", DataType::Int64, false),
        Field::new("episode_index", DataType::Int64, false),
        Field::new("index", DataType::Int64, false),
        Field::new("task_index", DataType::Int64, false),
    ];
    for cam in cameras {
        fields.push(Field::new(feature_name(cam), DataType::Utf8, true));
    }
    Schema::new(fields)
}

/// Frame path as stored in a table: `/`-joined and relative to `base` when
/// the frame lies under it, unchanged otherwise.
pub fn stored_frame_path(path: &str, base: Option<&Path>) -> String {
    let Some(rel) = base.and_then(|b| Path::new(path).strip_prefix(b).ok()) else {
        return path.to_string();
    };
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Converts one synchronized episode into a record batch.
///
/// `first_index` is the dataset-wide index of the episode's first frame.
pub fn episode_to_record_batch(
    episode: &SyncedEpisodeJson,
    cameras: &[String],
    fps: f64,
    first_index: usize,
    frames_base: Option<&Path>,
) -> Result<RecordBatch, ConversionError> {
    let schema = Arc::new(episode_schema(cameras));

    let mut state = ListBuilder::new(Float32Builder::new());
    let mut action = ListBuilder::new(Float32Builder::new());
    let mut timestamp = Float32Builder::new();
    let mut frame_index = Int64Builder::new();
    let mut episode_index = Int64Builder::new();
    let mut index = Int64Builder::new();
    let mut task_index = Int64Builder::new();
    let mut images: Vec<StringBuilder> = cameras.iter().map(|_| StringBuilder::new()).collect();

    for (i, frame) in episode.frames.iter().enumerate() {
        for &p in &frame.joint_state.pos {
            state.values().append_value(p as f32);
            action.values().append_value(p as f32);
        }
        state.append(true);
        action.append(true);

        timestamp.append_value((i as f64 / fps) as f32);
        frame_index.append_value(i as i64);
        episode_index.append_value(episode.eidx as i64);
        index.append_value((first_index + i) as i64);
        task_index.append_value(0);

        for (cam, column) in cameras.iter().zip(images.iter_mut()) {
            match frame.images.get(cam) {
                Some(path) => column.append_value(stored_frame_path(path, frames_base)),
                None => column.append_null(),
            }
        }
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(state.finish()),
        Arc::new(action.finish()),
        Arc::new(timestamp.finish()),
        Arc::new(frame_index.finish()),
        Arc::new(episode_index.finish()),
        Arc::new(index.finish()),
        Arc::new(task_index.finish()),
    ];
    for mut column in images {
        columns.push(Arc::new(column.finish()));
    }

    Ok(RecordBatch::try_new(schema, columns)?)
}

pub fn episode_table_path(output: &Path, episode_index: usize) -> PathBuf {
    output
        .join("data")
        .join(format!("chunk-{:03}", episode_index / CHUNKS_SIZE))
        .join(format!("episode_{:06}.parquet", episode_index))
}

fn write_batch(batch: &RecordBatch, path: &Path) -> Result<(), ConversionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// `meta/info.json` describing features and totals.
pub fn info_json(manifest: &SyncedManifest, fps: f64) -> Value {
    let joint_names = manifest.joint_names();
    let shape = manifest.image_shape.unwrap_or([0, 0, 3]);

    let mut features = Map::new();
    for cam in &manifest.cameras {
        features.insert(
            feature_name(cam),
            json!({
                "dtype": "image",
                "shape": shape,
                "names": ["height", "width", "channels"],
            }),
        );
    }
    for key in ["observation.state", "action"] {
        features.insert(
            key.to_string(),
            json!({
                "dtype": "float32",
                "shape": [joint_names.len()],
                "names": joint_names,
            }),
        );
    }
    for key in ["frame_index", "episode_index", "index", "task_index"] {
        features.insert(
            key.to_string(),
            json!({ "dtype": "int64", "shape": [1], "names": null }),
        );
    }
    features.insert(
        "timestamp".to_string(),
        json!({ "dtype": "float32", "shape": [1], "names": null }),
    );

    let total_episodes = manifest.episodes.len();
    json!({
        "codebase_version": CODEBASE_VERSION,
        "robot_type": null,
        "total_episodes": total_episodes,
        "total_frames": manifest.total_frames(),
        "total_tasks": 1,
        "total_videos": 0,
        "total_chunks": total_episodes.div_ceil(CHUNKS_SIZE),
        "chunks_size": CHUNKS_SIZE,
        "fps": fps,
        "splits": { "train": format!("0:{}", total_episodes) },
        "data_path": "data/chunk-{episode_chunk:03d}/episode_{episode_index:06d}.parquet",
        "video_path": null,
        "features": features,
    })
}

fn write_jsonl<'a>(path: &Path, lines: impl IntoIterator<Item = &'a Value>) -> Result<(), ConversionError> {
    let mut file = fs::File::create(path)?;
    for line in lines {
        serde_json::to_writer(&mut file, line)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Summary of a written dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct LeRobotSummary {
    pub fps: f64,
    pub total_episodes: usize,
    pub total_frames: usize,
}

/// Writes the complete LeRobot layout for `manifest` under `output`.
pub fn write_dataset(
    manifest: &SyncedManifest,
    output: &Path,
    default_fps: f64,
) -> Result<LeRobotSummary, ConversionError> {
    let fps = effective_fps(manifest.estimated_fps, default_fps);
    let meta = output.join("meta");
    fs::create_dir_all(&meta)?;

    let mut first_index = 0;
    let mut episode_lines = Vec::with_capacity(manifest.episodes.len());
    for episode in &manifest.episodes {
        let batch =
            episode_to_record_batch(episode, &manifest.cameras, fps, first_index, output.parent())?;
        let path = episode_table_path(output, episode.eidx);
        write_batch(&batch, &path)?;
        tracing::debug!(
            path = %path.display(),
            rows = batch.num_rows(),
            "Episode table written"
        );

        first_index += episode.frames.len();
        episode_lines.push(json!({
            "episode_index": episode.eidx,
            "tasks": [DEFAULT_TASK],
            "length": episode.frames.len(),
        }));
    }

    write_jsonl(&meta.join("episodes.jsonl"), &episode_lines)?;
    write_jsonl(
        &meta.join("tasks.jsonl"),
        &[json!({ "task_index": 0, "task": DEFAULT_TASK })],
    )?;
    let info = info_json(manifest, fps);
    fs::write(meta.join("info.json"), serde_json::to_vec_pretty(&info)?)?;

    tracing::info!(
        output = %output.display(),
        episodes = manifest.episodes.len(),
        frames = first_index,
        fps,
        "LeRobot dataset written"
    );

    Ok(LeRobotSummary {
        fps,
        total_episodes: manifest.episodes.len(),
        total_frames: first_index,
    })
}
