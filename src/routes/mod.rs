//! HTTP ingress gateway.
//!
//! Each sibling module exports a subrouter; this gateway merges them and binds
//! the shared [`AppState`], so `main.rs` never sees individual endpoints.

use std::sync::Arc;

use axum::Router;

use crate::bus::MessageBus;
use crate::models::Target;
use crate::settings::SettingsStore;

mod api;
mod health;

// ---

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub bus: MessageBus,
    pub settings: Arc<SettingsStore>,
    /// Targets whose statistical model finished training at startup.
    pub models_trained: Arc<Vec<Target>>,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(api::router())
        .merge(health::router())
        .with_state(state)
}
