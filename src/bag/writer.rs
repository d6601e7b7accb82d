//! Writer for ROS 2 sqlite3 bag files.
//!
//! Produces the `topics`/`messages` layout [`crate::bag::Db3Log`] reads. Used to
//! build episode fixtures and to re-record filtered captures.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::BagError;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS topics (
    id                    INTEGER PRIMARY KEY,
    name                  TEXT NOT NULL,
    type                  TEXT NOT NULL,
    serialization_format  TEXT NOT NULL,
    offered_qos_profiles  TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS messages (
    id        INTEGER PRIMARY KEY,
    topic_id  INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    data      BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS timestamp_idx ON messages (timestamp ASC);
"#;

pub struct Db3Writer {
    pool: SqlitePool,
    topic_ids: HashMap<String, i64>,
}

impl Db3Writer {
    /// Creates (or reopens) a bag file at `path`.
    pub async fn create(path: &Path) -> Result<Self, BagError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            topic_ids: HashMap::new(),
        })
    }

    /// Declares a CDR topic and returns its id.
    pub async fn add_topic(&mut self, name: &str, msg_type: &str) -> Result<i64, BagError> {
        if let Some(id) = self.topic_ids.get(name) {
            return Ok(*id);
        }

        let id = self.topic_ids.len() as i64 + 1;
        sqlx::query(
            "INSERT INTO topics (id, name, type, serialization_format) VALUES (?1, ?2, ?3, 'cdr')",
        )
        .bind(id)
        .bind(name)
        .bind(msg_type)
        .execute(&self.pool)
        .await?;

        self.topic_ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Appends one serialized message. The topic must have been declared.
    pub async fn write(&mut self, topic: &str, timestamp: i64, data: &[u8]) -> Result<(), BagError> {
        let topic_id = *self.topic_ids.get(topic).ok_or_else(|| {
            BagError::Configuration(format!("topic '{}' was not declared", topic))
        })?;

        sqlx::query("INSERT INTO messages (topic_id, timestamp, data) VALUES (?1, ?2, ?3)")
            .bind(topic_id)
            .bind(timestamp)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn finish(self) {
        self.pool.close().await;
    }
}
