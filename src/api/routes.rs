//! Route table and handlers.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use super::{ApiError, AppState};
use crate::jobs::TrainRequest;
use crate::metrics::{metrics_handler, MetricsCollector};
use crate::storage::{BlobMeta, DatasetRecord, DatasetStatus, TrainingJob, WEIGHTS_NAMESPACE};
use crate::supervisor::ConversionTask;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct DatasetQuery {
    pub dataset_name: String,
}

#[derive(Debug, Deserialize)]
pub struct FilenameQuery {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    /// `datasets`, `weights` or `jobs`.
    pub file: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_lines")]
    pub lines: usize,
}

fn default_lines() -> usize {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversionResponse {
    pub dataset: String,
    pub status: DatasetStatus,
    pub worker_pid: i32,
    pub log_path: String,
}

impl From<ConversionTask> for ConversionResponse {
    fn from(task: ConversionTask) -> Self {
        Self {
            dataset: task.dataset,
            status: DatasetStatus::Conversion,
            worker_pid: task.worker_pid,
            log_path: task.log_path.display().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub job_id: String,
    pub status_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogResponse {
    pub log_tail: String,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/create-dataset/", post(create_dataset))
        .route("/upload", post(upload))
        .route("/save-dataset/", post(save_dataset))
        .route("/convert-dataset/", post(convert_dataset))
        .route("/datasets/:name", get(get_dataset))
        .route("/preview", get(preview))
        .route("/list", get(list_files))
        .route("/download", get(download))
        .route("/train", post(train))
        .route("/status/:job_id", get(job_status))
        .route("/log/:job_id", get(job_log))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "episode-forge"
    }))
}

async fn create_dataset(
    State(state): State<AppState>,
    Query(q): Query<DatasetQuery>,
) -> ApiResult<Json<DatasetRecord>> {
    Ok(Json(state.lifecycle.create(&q.dataset_name).await?))
}

/// Stores a raw body at `<namespace>/<relative path>`.
///
/// Dataset namespaces accept files only while the dataset is being created;
/// the weights namespace is written directly.
async fn upload(
    State(state): State<AppState>,
    Query(q): Query<FilenameQuery>,
    body: Bytes,
) -> ApiResult<Json<BlobMeta>> {
    let (namespace, relative) = q
        .filename
        .split_once('/')
        .ok_or_else(|| ApiError::bad_request(format!("filename '{}' has no namespace", q.filename)))?;

    if namespace == WEIGHTS_NAMESPACE {
        let meta = state.blobs.put(&q.filename, &body).await?;
        MetricsCollector::new().record_upload(body.len());
        return Ok(Json(meta));
    }
    Ok(Json(
        state.lifecycle.upload_file(namespace, relative, &body).await?,
    ))
}

async fn save_dataset(
    State(state): State<AppState>,
    Query(q): Query<DatasetQuery>,
) -> ApiResult<Json<ConversionResponse>> {
    Ok(Json(state.lifecycle.save(&q.dataset_name).await?.into()))
}

async fn convert_dataset(
    State(state): State<AppState>,
    Query(q): Query<DatasetQuery>,
) -> ApiResult<Json<ConversionResponse>> {
    Ok(Json(state.lifecycle.convert(&q.dataset_name).await?.into()))
}

async fn get_dataset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<DatasetRecord>> {
    Ok(Json(state.lifecycle.status(&name).await?))
}

async fn preview(
    State(state): State<AppState>,
    Query(q): Query<PreviewQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = q.limit.clamp(1, 1000);
    let value = match q.file.as_str() {
        "datasets" => serde_json::to_value(state.lifecycle.list(limit).await?),
        "weights" => serde_json::to_value(state.store.list_weights(limit).await?),
        "jobs" => serde_json::to_value(state.jobs.list(limit).await?),
        other => {
            return Err(ApiError::bad_request(format!(
                "unknown preview table '{}'; expected datasets, weights or jobs",
                other
            )))
        }
    };
    value.map(Json).map_err(ApiError::internal)
}

async fn list_files(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    Ok(Json(ListResponse {
        files: state.blobs.list(&q.name).await?,
    }))
}

async fn download(
    State(state): State<AppState>,
    Query(q): Query<FilenameQuery>,
) -> ApiResult<impl IntoResponse> {
    let data = state.blobs.get(&q.filename).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

async fn train(
    State(state): State<AppState>,
    Json(req): Json<TrainRequest>,
) -> ApiResult<Json<TrainResponse>> {
    let job = state.jobs.submit(req).await?;
    Ok(Json(TrainResponse {
        status_url: format!("/status/{}", job.job_id),
        job_id: job.job_id,
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<TrainingJob>> {
    Ok(Json(state.jobs.status(&job_id).await?))
}

async fn job_log(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(q): Query<LogQuery>,
) -> ApiResult<Json<LogResponse>> {
    Ok(Json(LogResponse {
        log_tail: state.jobs.log_tail(&job_id, q.lines).await?,
    }))
}
