pub mod health;
pub mod runs;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/analyze", post(runs::handle_analyze))
        .route("/api/v1/runs", post(runs::handle_submit))
        .route("/api/v1/runs/:id", get(runs::handle_get_run))
        .route("/api/v1/runs/:id/result", get(runs::handle_get_result))
        .route("/api/v1/runs/:id/cancel", post(runs::handle_cancel))
        .route("/api/v1/runs/:id/export", post(runs::handle_export))
        .with_state(state)
}
