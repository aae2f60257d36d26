// src/routes/health.rs
//! Liveness endpoint.
//!
//! Besides reachability it reports which statistical models are available and
//! whether the thresholds have been overridden since startup, so an operator
//! can tell a rules-only deployment apart from a fully trained one.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    models_trained: Vec<&'static str>,
    settings_overridden: bool,
}

/// Handle `GET /health`. Reads only in-memory state.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    // ---
    Json(HealthResponse {
        status: "ok",
        models_trained: state.models_trained.iter().map(|t| t.as_str()).collect(),
        settings_overridden: state.settings.get().overridden,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
