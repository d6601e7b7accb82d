//! Message log access for ROS 2 sqlite3 (`.db3`) bag storage.
//!
//! An episode directory may hold several `.db3` files; [`Db3Log`] merges them
//! into one stream ordered by timestamp, reading each file in fixed-size pages.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::BagError;

/// Messages fetched per query per storage file.
const PAGE_SIZE: i64 = 256;

/// Connection metadata for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub name: String,
    pub msg_type: String,
    pub serialization_format: String,
}

/// One serialized message in log order.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: String,
    pub timestamp: i64,
    pub data: Vec<u8>,
}

/// A sequential, topic-tagged message log for one episode.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Topics declared by the log's connection metadata.
    fn topics(&self) -> &[TopicInfo];

    /// Topics carrying at least one message, ordered by first appearance.
    async fn active_topics(&self) -> Result<Vec<String>, BagError>;

    /// Next message in timestamp order, `None` once exhausted.
    async fn next_message(&mut self) -> Result<Option<RawMessage>, BagError>;
}

/// Paged cursor over one `.db3` file.
struct FileCursor {
    pool: SqlitePool,
    topic_names: HashMap<i64, String>,
    buffer: VecDeque<RawMessage>,
    last_key: (i64, i64),
    exhausted: bool,
}

impl FileCursor {
    async fn open(path: &Path) -> Result<(Self, Vec<TopicInfo>), BagError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let rows = sqlx::query("SELECT id, name, type, serialization_format FROM topics ORDER BY id")
            .fetch_all(&pool)
            .await?;

        let mut topic_names = HashMap::with_capacity(rows.len());
        let mut topics = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("name");
            topic_names.insert(row.get::<i64, _>("id"), name.clone());
            topics.push(TopicInfo {
                name,
                msg_type: row.get("type"),
                serialization_format: row.get("serialization_format"),
            });
        }

        let cursor = Self {
            pool,
            topic_names,
            buffer: VecDeque::new(),
            last_key: (i64::MIN, i64::MIN),
            exhausted: false,
        };
        Ok((cursor, topics))
    }

    async fn fill(&mut self) -> Result<(), BagError> {
        while self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(())
    }

    async fn fetch_page(&mut self) -> Result<(), BagError> {
        let rows = sqlx::query(
            "SELECT id, topic_id, timestamp, data FROM messages \
             WHERE timestamp > ?1 OR (timestamp = ?1 AND id > ?2) \
             ORDER BY timestamp, id LIMIT ?3",
        )
        .bind(self.last_key.0)
        .bind(self.last_key.1)
        .bind(PAGE_SIZE)
        .fetch_all(&self.pool)
        .await?;

        if (rows.len() as i64) < PAGE_SIZE {
            self.exhausted = true;
        }

        for row in rows {
            let id: i64 = row.get("id");
            let topic_id: i64 = row.get("topic_id");
            let timestamp: i64 = row.get("timestamp");
            self.last_key = (timestamp, id);

            // Messages on undeclared topics cannot be classified.
            let Some(topic) = self.topic_names.get(&topic_id) else {
                tracing::debug!(topic_id, "Skipping message on undeclared topic");
                continue;
            };
            self.buffer.push_back(RawMessage {
                topic: topic.clone(),
                timestamp,
                data: row.get("data"),
            });
        }

        Ok(())
    }

    fn peek_timestamp(&self) -> Option<i64> {
        self.buffer.front().map(|m| m.timestamp)
    }
}

/// Message log backed by the `.db3` files of one episode directory.
pub struct Db3Log {
    dir: PathBuf,
    topics: Vec<TopicInfo>,
    cursors: Vec<FileCursor>,
}

impl Db3Log {
    /// Opens every `.db3` file directly under `dir`.
    pub async fn open(dir: &Path) -> Result<Self, BagError> {
        let files = storage_files(dir)?;
        if files.is_empty() {
            return Err(BagError::NoStorageFiles(dir.display().to_string()));
        }

        let mut topics: Vec<TopicInfo> = Vec::new();
        let mut cursors = Vec::with_capacity(files.len());
        for file in &files {
            let (cursor, file_topics) = FileCursor::open(file).await?;
            for info in file_topics {
                if !topics.iter().any(|t| t.name == info.name) {
                    topics.push(info);
                }
            }
            cursors.push(cursor);
        }

        tracing::debug!(
            dir = %dir.display(),
            files = files.len(),
            topics = topics.len(),
            "Opened episode message log"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            topics,
            cursors,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn close(self) {
        for cursor in self.cursors {
            cursor.pool.close().await;
        }
    }
}

#[async_trait]
impl MessageLog for Db3Log {
    fn topics(&self) -> &[TopicInfo] {
        &self.topics
    }

    async fn active_topics(&self) -> Result<Vec<String>, BagError> {
        let mut first_seen: HashMap<String, (i64, i64)> = HashMap::new();
        for cursor in &self.cursors {
            let rows = sqlx::query(
                "SELECT t.name AS name, MIN(m.timestamp) AS first_ts, MIN(m.id) AS first_id \
                 FROM messages m JOIN topics t ON t.id = m.topic_id GROUP BY t.name",
            )
            .fetch_all(&cursor.pool)
            .await?;
            for row in rows {
                let name: String = row.get("name");
                let key = (row.get::<i64, _>("first_ts"), row.get::<i64, _>("first_id"));
                first_seen
                    .entry(name)
                    .and_modify(|k| *k = (*k).min(key))
                    .or_insert(key);
            }
        }

        let mut active: Vec<(String, (i64, i64))> = first_seen.into_iter().collect();
        active.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(active.into_iter().map(|(name, _)| name).collect())
    }

    async fn next_message(&mut self) -> Result<Option<RawMessage>, BagError> {
        for cursor in &mut self.cursors {
            cursor.fill().await?;
        }

        // Earliest head wins; ties go to the earlier file.
        let next = self
            .cursors
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.peek_timestamp().map(|ts| (ts, i)))
            .min();

        Ok(next.and_then(|(_, i)| self.cursors[i].buffer.pop_front()))
    }
}

/// `.db3` files directly under `dir`, sorted by name.
pub fn storage_files(dir: &Path) -> Result<Vec<PathBuf>, BagError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "db3") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Episode directories under `bag_root`: immediate subdirectories holding a `.db3` file.
pub fn discover_episodes(bag_root: &Path) -> Result<Vec<PathBuf>, BagError> {
    let mut episodes = Vec::new();
    for entry in std::fs::read_dir(bag_root)? {
        let path = entry?.path();
        if path.is_dir() && !storage_files(&path)?.is_empty() {
            episodes.push(path);
        }
    }
    episodes.sort();
    Ok(episodes)
}
