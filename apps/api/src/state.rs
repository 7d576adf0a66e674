use crate::jobs::orchestrator::Orchestrator;

/// Shared application state injected into all route handlers via Axum extractors.
/// The orchestrator owns every collaborator (stores, model, renderer) and the config.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}
