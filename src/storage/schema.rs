//! SQLite schema for the record store.
//!
//! Applied on every open; every statement is idempotent.

/// Dataset records, keyed by name.
pub const CREATE_DATASETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS datasets (
    name TEXT PRIMARY KEY,
    num_episodes INTEGER NOT NULL DEFAULT 0,
    source_format TEXT NOT NULL,
    work_format TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// One row per trained policy archive.
pub const CREATE_WEIGHTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS weights (
    name TEXT PRIMARY KEY,
    dataset TEXT NOT NULL,
    steps INTEGER NOT NULL,
    created_at TEXT NOT NULL
)
"#;

pub const CREATE_TRAINING_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS training_jobs (
    job_id TEXT PRIMARY KEY,
    dataset TEXT NOT NULL,
    state TEXT NOT NULL,
    progress REAL NOT NULL DEFAULT 0,
    message TEXT NOT NULL DEFAULT '',
    request TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_datasets_status ON datasets(status);
CREATE INDEX IF NOT EXISTS idx_training_jobs_state ON training_jobs(state);
CREATE INDEX IF NOT EXISTS idx_weights_dataset ON weights(dataset);
"#;

/// All schema statements in application order.
pub fn all_statements() -> [&'static str; 4] {
    [
        CREATE_DATASETS_TABLE,
        CREATE_WEIGHTS_TABLE,
        CREATE_TRAINING_JOBS_TABLE,
        CREATE_INDEXES,
    ]
}
