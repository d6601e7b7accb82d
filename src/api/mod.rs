//! HTTP surface: dataset lifecycle, blob access, training jobs and metrics.

pub mod routes;
pub mod server;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{JobError, LifecycleError, SupervisorError};
use crate::jobs::JobSupervisor;
use crate::lifecycle::DatasetLifecycleManager;
use crate::storage::{BlobError, BlobStore, RecordStore, StoreError};

pub use routes::create_router;
pub use server::{serve, shutdown_signal};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<DatasetLifecycleManager>,
    pub jobs: Arc<JobSupervisor>,
    pub store: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub max_upload_bytes: usize,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                code: code.to_string(),
            },
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", error)
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        tracing::error!(error = %error, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateName(_) => Self::new(StatusCode::CONFLICT, "DUPLICATE_NAME", err.to_string()),
            StoreError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
            BlobError::InvalidKey(_) => Self::bad_request(err.to_string()),
            BlobError::TransientNetwork(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", err.to_string())
            }
            BlobError::Http { .. } => Self::new(StatusCode::BAD_GATEWAY, "UPSTREAM", err.to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::DuplicateName(_) => {
                Self::new(StatusCode::CONFLICT, "DUPLICATE_NAME", err.to_string())
            }
            LifecycleError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
            LifecycleError::InvalidState { .. } | LifecycleError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_STATE", err.to_string())
            }
            LifecycleError::InvalidName(_) => Self::bad_request(err.to_string()),
            LifecycleError::Supervisor(SupervisorError::Conflict { .. }) => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", err.to_string())
            }
            LifecycleError::Store(e) => e.into(),
            LifecycleError::Blob(e) => e.into(),
            other => Self::internal(other),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) | JobError::DatasetNotFound(_) | JobError::LogNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            JobError::NotConverted(_) => {
                Self::new(StatusCode::CONFLICT, "INVALID_STATE", err.to_string())
            }
            JobError::Store(e) => e.into(),
            JobError::Blob(e) => e.into(),
            other => Self::internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_error_status_codes() {
        let dup: ApiError = LifecycleError::DuplicateName("d".into()).into();
        assert_eq!(dup.status, StatusCode::CONFLICT);
        assert_eq!(dup.body.code, "DUPLICATE_NAME");

        let state: ApiError = LifecycleError::InvalidState {
            name: "d".into(),
            expected: "creating".into(),
            actual: "store".into(),
        }
        .into();
        assert_eq!(state.status, StatusCode::CONFLICT);
        assert!(state.body.error.contains("store"));

        let missing: ApiError = LifecycleError::NotFound("d".into()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let name: ApiError = LifecycleError::InvalidName("..".into()).into();
        assert_eq!(name.status, StatusCode::BAD_REQUEST);

        let conflict: ApiError = LifecycleError::Supervisor(SupervisorError::Conflict {
            dataset: "d".into(),
            pid: 7,
        })
        .into();
        assert_eq!(conflict.body.code, "CONFLICT");
    }

    #[test]
    fn test_job_error_status_codes() {
        let missing: ApiError = JobError::DatasetNotFound("d".into()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        let spawn: ApiError = JobError::Spawn("nope".into()).into();
        assert_eq!(spawn.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
