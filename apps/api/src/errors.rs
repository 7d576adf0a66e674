use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::profiles::ProfileStoreError;
use crate::render::RenderError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Storage(e) => {
                tracing::error!("Storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Conversion(msg) => {
                tracing::error!("Conversion error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "CONVERSION_ERROR",
                    "The export conversion failed".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

/// Failure of a persistence collaborator (run store, artifact store, notifier).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("run {0} is terminal and can no longer change")]
    Terminal(uuid::Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Pipeline failure taxonomy. Only `Input` is surfaced synchronously (at submit);
/// everything else ends up recorded on the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("requirement extraction failed: {0}")]
    Extraction(String),

    #[error("document render failed: {0}")]
    Render(#[from] RenderError),

    #[error("external call failed after retries: {0}")]
    TransientCall(String),

    #[error("storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("run was cancelled")]
    Cancelled,

    #[error("internal pipeline failure: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Input(_) => ErrorKind::InputError,
            PipelineError::Extraction(_) => ErrorKind::ExtractionError,
            PipelineError::Render(_) => ErrorKind::RenderError,
            PipelineError::TransientCall(_) => ErrorKind::TransientCallError,
            PipelineError::Storage(_) => ErrorKind::StorageError,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Input(msg) | PipelineError::Extraction(msg) => AppError::Validation(msg),
            PipelineError::Storage(e) => AppError::Storage(e),
            other => AppError::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl From<ProfileStoreError> for AppError {
    fn from(err: ProfileStoreError) -> Self {
        match err {
            ProfileStoreError::NotFound(user_id) => {
                AppError::NotFound(format!("Profile for user '{user_id}' not found"))
            }
            ProfileStoreError::Database(e) => AppError::Storage(StoreError::Database(e)),
        }
    }
}

/// Persisted error classification on a `PipelineRun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputError,
    ExtractionError,
    RenderError,
    TransientCallError,
    StorageError,
    Cancelled,
    Internal,
}

/// The error recorded on a failed (or partially rendered) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    /// Captured compiler log for render failures.
    pub log: Option<String>,
}

impl From<&PipelineError> for RunError {
    fn from(err: &PipelineError) -> Self {
        let log = match err {
            PipelineError::Render(render) => render.compiler_log().map(str::to_string),
            _ => None,
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            log,
        }
    }
}
