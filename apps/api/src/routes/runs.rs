//! Axum route handlers for the Runs API. Thin wrappers over `Orchestrator`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::orchestrator::{AnalyzeRequest, Analysis, SubmitRequest};
use crate::models::run::{ExportRef, PipelineRun, RunResult};
use crate::render::converter::ExportFormat;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub format: ExportFormat,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub artifact_ref: ExportRef,
}

/// POST /api/v1/runs
pub async fn handle_submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let run_id = state.orchestrator.submit(req).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { run_id })))
}

/// POST /api/v1/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<Analysis>, AppError> {
    Ok(Json(state.orchestrator.analyze(req).await?))
}

/// GET /api/v1/runs/:id
pub async fn handle_get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PipelineRun>, AppError> {
    Ok(Json(state.orchestrator.get_status(id).await?))
}

/// GET /api/v1/runs/:id/result
pub async fn handle_get_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunResult>, AppError> {
    Ok(Json(state.orchestrator.get_result(id).await?))
}

/// POST /api/v1/runs/:id/cancel
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<PipelineRun>), AppError> {
    let run = state.orchestrator.cancel(id).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// POST /api/v1/runs/:id/export
pub async fn handle_export(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<ExportResponse>, AppError> {
    let artifact_ref = state.orchestrator.export(id, req.format).await?;
    Ok(Json(ExportResponse { artifact_ref }))
}
