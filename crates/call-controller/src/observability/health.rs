//! Health endpoints for the call controller.
//!
//! Kubernetes-compatible probes plus a diagnostics snapshot:
//! - `GET /health` - liveness (is the process running?)
//! - `GET /ready` - readiness (is the registry accepting traffic?)
//! - `GET /status` - registry snapshot (call/connection counts)
//!
//! The `/metrics` endpoint is served separately via
//! `metrics-exporter-prometheus`.

use crate::actors::CallRegistryHandle;
use crate::errors::RelayError;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for the call controller.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup (process is running).
    live: AtomicBool,
    /// True once the listener is bound, false again during shutdown.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the service ready to serve traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service not ready (e.g. during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Shared state for the health router.
#[derive(Clone)]
pub struct ObservabilityState {
    pub health: Arc<HealthState>,
    pub registry: CallRegistryHandle,
}

/// Create the health router.
pub fn health_router(health: Arc<HealthState>, registry: CallRegistryHandle) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .with_state(ObservabilityState { health, registry })
}

async fn liveness_handler(State(state): State<ObservabilityState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<ObservabilityState>) -> StatusCode {
    if state.health.is_ready() && !state.registry.is_cancelled() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Registry snapshot for diagnostics.
async fn status_handler(
    State(state): State<ObservabilityState>,
) -> Result<Json<crate::actors::RegistryStatus>, RelayError> {
    let status = state.registry.status().await?;
    Ok(Json(status))
}
