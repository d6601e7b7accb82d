//! SQLite record store for datasets, weights and training jobs.
//!
//! Status changes go through [`RecordStore::compare_and_set_status`], an
//! `UPDATE ... WHERE name = ? AND status = ?` that only succeeds when the
//! record still holds the expected status. Job updates never touch a job that
//! already reached a terminal state.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use super::models::{
    DatasetRecord, DatasetStatus, JobState, JobUpdate, TrainingJob, WeightsRecord,
};
use super::schema;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record '{0}' already exists")]
    DuplicateName(String),

    #[error("Record '{0}' not found")]
    NotFound(String),

    #[error("Query failed: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be interpreted.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Durable keyed storage for dataset, weights and job records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new dataset; fails with [`StoreError::DuplicateName`] if the name is taken.
    async fn insert_dataset(&self, record: &DatasetRecord) -> Result<(), StoreError>;
    async fn get_dataset(&self, name: &str) -> Result<Option<DatasetRecord>, StoreError>;
    async fn list_datasets(&self, limit: i64) -> Result<Vec<DatasetRecord>, StoreError>;
    async fn datasets_with_status(
        &self,
        status: DatasetStatus,
    ) -> Result<Vec<DatasetRecord>, StoreError>;
    /// Moves `name` from `expected` to `next`. Returns `false` when the record
    /// is missing or no longer in `expected`.
    async fn compare_and_set_status(
        &self,
        name: &str,
        expected: DatasetStatus,
        next: DatasetStatus,
    ) -> Result<bool, StoreError>;
    async fn set_num_episodes(&self, name: &str, num_episodes: i64) -> Result<(), StoreError>;

    async fn insert_weights(&self, record: &WeightsRecord) -> Result<(), StoreError>;
    async fn list_weights(&self, limit: i64) -> Result<Vec<WeightsRecord>, StoreError>;

    async fn insert_job(&self, job: &TrainingJob) -> Result<(), StoreError>;
    async fn get_job(&self, job_id: &str) -> Result<Option<TrainingJob>, StoreError>;
    async fn list_jobs(&self, limit: i64) -> Result<Vec<TrainingJob>, StoreError>;
    /// Applies `update` unless the job is missing or terminal. Returns whether a row changed.
    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<bool, StoreError>;
    /// Marks every pending or running job failed with `message`.
    async fn fail_unfinished_jobs(&self, message: &str) -> Result<u64, StoreError>;
}

/// [`RecordStore`] backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Opens (creating if missing) the database at `url` and applies the schema.
    ///
    /// `sqlite::memory:` opens a private in-memory database on a single connection.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let in_memory = url.contains(":memory:");
        let mut opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        if !in_memory {
            if let Some(parent) = sqlite_file_parent(url) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Corrupt(format!("cannot create {}: {}", url, e)))?;
            }
            opts = opts
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool_opts = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 });
        if in_memory {
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_opts.connect_with(opts).await?;

        for stmt in schema::all_statements() {
            sqlx::query(stmt).execute(&pool).await?;
        }

        tracing::info!(url = url, "Record store opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn sqlite_file_parent(url: &str) -> Option<std::path::PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    std::path::Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

fn dataset_from_row(row: &SqliteRow) -> Result<DatasetRecord, StoreError> {
    let status: String = row.get("status");
    Ok(DatasetRecord {
        name: row.get("name"),
        num_episodes: row.get("num_episodes"),
        source_format: row.get("source_format"),
        work_format: row.get("work_format"),
        status: DatasetStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("dataset status '{}'", status)))?,
        created_at: parse_time(row.get("created_at"))?,
        updated_at: parse_time(row.get("updated_at"))?,
    })
}

fn weights_from_row(row: &SqliteRow) -> Result<WeightsRecord, StoreError> {
    Ok(WeightsRecord {
        name: row.get("name"),
        dataset: row.get("dataset"),
        steps: row.get("steps"),
        created_at: parse_time(row.get("created_at"))?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<TrainingJob, StoreError> {
    let state: String = row.get("state");
    let request: String = row.get("request");
    Ok(TrainingJob {
        job_id: row.get("job_id"),
        dataset: row.get("dataset"),
        state: JobState::parse(&state)
            .ok_or_else(|| StoreError::Corrupt(format!("job state '{}'", state)))?,
        progress: row.get("progress"),
        message: row.get("message"),
        request: serde_json::from_str(&request)
            .map_err(|e| StoreError::Corrupt(format!("job request: {}", e)))?,
        created_at: parse_time(row.get("created_at"))?,
        updated_at: parse_time(row.get("updated_at"))?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert_dataset(&self, record: &DatasetRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO datasets (name, num_episodes, source_format, work_format, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&record.name)
        .bind(record.num_episodes)
        .bind(&record.source_format)
        .bind(&record.work_format)
        .bind(record.status.as_str())
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateName(record.name.clone()));
        }
        Ok(())
    }

    async fn get_dataset(&self, name: &str) -> Result<Option<DatasetRecord>, StoreError> {
        sqlx::query("SELECT * FROM datasets WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(dataset_from_row)
            .transpose()
    }

    async fn list_datasets(&self, limit: i64) -> Result<Vec<DatasetRecord>, StoreError> {
        sqlx::query("SELECT * FROM datasets ORDER BY created_at ASC, name ASC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(dataset_from_row)
            .collect()
    }

    async fn datasets_with_status(
        &self,
        status: DatasetStatus,
    ) -> Result<Vec<DatasetRecord>, StoreError> {
        sqlx::query("SELECT * FROM datasets WHERE status = ?1 ORDER BY name ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(dataset_from_row)
            .collect()
    }

    async fn compare_and_set_status(
        &self,
        name: &str,
        expected: DatasetStatus,
        next: DatasetStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE datasets SET status = ?1, updated_at = ?2 WHERE name = ?3 AND status = ?4",
        )
        .bind(next.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(name)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_num_episodes(&self, name: &str, num_episodes: i64) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE datasets SET num_episodes = ?1, updated_at = ?2 WHERE name = ?3")
                .bind(num_episodes)
                .bind(Utc::now().to_rfc3339())
                .bind(name)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn insert_weights(&self, record: &WeightsRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO weights (name, dataset, steps, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&record.name)
        .bind(&record.dataset)
        .bind(record.steps)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateName(record.name.clone()));
        }
        Ok(())
    }

    async fn list_weights(&self, limit: i64) -> Result<Vec<WeightsRecord>, StoreError> {
        sqlx::query("SELECT * FROM weights ORDER BY created_at ASC, name ASC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(weights_from_row)
            .collect()
    }

    async fn insert_job(&self, job: &TrainingJob) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO training_jobs (job_id, dataset, state, progress, message, request, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(job_id) DO NOTHING",
        )
        .bind(&job.job_id)
        .bind(&job.dataset)
        .bind(job.state.as_str())
        .bind(job.progress)
        .bind(&job.message)
        .bind(job.request.to_string())
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateName(job.job_id.clone()));
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<TrainingJob>, StoreError> {
        sqlx::query("SELECT * FROM training_jobs WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(job_from_row)
            .transpose()
    }

    async fn list_jobs(&self, limit: i64) -> Result<Vec<TrainingJob>, StoreError> {
        sqlx::query("SELECT * FROM training_jobs ORDER BY created_at ASC, job_id ASC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(job_from_row)
            .collect()
    }

    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE training_jobs SET
                state = COALESCE(?1, state),
                progress = COALESCE(?2, progress),
                message = COALESCE(?3, message),
                updated_at = ?4
             WHERE job_id = ?5 AND state NOT IN ('finished', 'failed')",
        )
        .bind(update.state.map(|s| s.as_str()))
        .bind(update.progress)
        .bind(update.message)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_unfinished_jobs(&self, message: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE training_jobs SET state = 'failed', message = ?1, updated_at = ?2
             WHERE state IN ('pending', 'running')",
        )
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
