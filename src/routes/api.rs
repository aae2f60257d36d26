//! Settings and reading ingress.
//!
//! Neither POST route touches the live state directly: both publish onto the
//! bus, so HTTP traffic is ordered with every other producer and the analyzer
//! stays the single writer of the settings store.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::bus::{SENSOR_DATA, SYSTEM_SETTINGS};
use crate::settings::ThresholdPatch;

use super::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/settings", get(get_settings).post(post_settings))
        .route("/api/readings", post(post_reading))
}

async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.settings.get().as_ref().clone())
}

async fn post_settings(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    // ---
    let Value::Object(map) = &body else {
        return bad_request("settings patch must be a JSON object");
    };
    if let Err(e) = ThresholdPatch::from_map(map) {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": e.to_string() })))
            .into_response();
    }

    match state.bus.publish(SYSTEM_SETTINGS, body.to_string()) {
        Ok(subscribers) => {
            info!(subscribers, "POST /api/settings - patch queued");
            Json(json!({ "status": "sent_to_queue" })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn post_reading(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    // ---
    if !body.is_object() {
        return bad_request("reading must be a JSON object");
    }

    match state.bus.publish(SENSOR_DATA, body.to_string()) {
        Ok(_) => (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response(),
        Err(e) => internal_error(e),
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    // ---
    error!("Failed to publish to bus: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "failed to enqueue" })),
    )
        .into_response()
}
