//! Router assembly.
//!
//! The whole HTTP surface hangs off one router: the REST call surface,
//! the WebSocket push gateway, and the health/status probes. CORS is wide
//! open - the browser client is served from wherever, and possession of a
//! valid call+connection identifier pair is the only admission control.

use crate::actors::CallRegistryHandle;
use crate::handlers::{call_handler, notifications};
use crate::observability::{health_router, HealthState};

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
pub struct AppState {
    pub registry: CallRegistryHandle,
}

/// Build the application router (shared between startup and tests).
pub fn app_router(registry: CallRegistryHandle, health: Arc<HealthState>) -> Router {
    let state = Arc::new(AppState {
        registry: registry.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/call", post(call_handler::create_call))
        .route(
            "/call/:call_id",
            get(call_handler::call_info).delete(call_handler::delete_call),
        )
        .route("/call/:call_id/connect", post(call_handler::connect))
        .route(
            "/call/:call_id/disconnect/:connection_id",
            post(call_handler::disconnect),
        )
        .route(
            "/call/:call_id/message/:connection_id",
            post(call_handler::message),
        )
        .route("/notifications", get(notifications::notifications))
        .with_state(state)
        .merge(health_router(health, registry))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
