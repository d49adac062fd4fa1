//! Call Controller
//!
//! Signaling relay for multi-party voice calls: identifies call sessions
//! and participant connections, relays signaling between each browser and
//! the media subsystem, and fans out asynchronous media events over
//! per-connection push channels.
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Install Prometheus metrics recorder
//! 4. Construct the media backend and the call registry
//! 5. Bind the HTTP listener, then serve (fail fast on bind errors)
//! 6. Wait for shutdown signal, then drain the registry

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use call_controller::actors::{CallRegistryHandle, RelayMetrics};
use call_controller::config::Config;
use call_controller::media::LoopbackMediaBackend;
use call_controller::observability::HealthState;
use call_controller::routes::app_router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Grace period between readiness flip and registry drain on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Call Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        request_timeout_seconds = config.request_timeout_seconds,
        pending_sweep_interval_seconds = config.pending_sweep_interval_seconds,
        "Configuration loaded successfully"
    );

    // Install Prometheus metrics recorder before anything records
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;

    let health_state = Arc::new(HealthState::new());
    let metrics = RelayMetrics::new();

    // The media backend is the seam to the external SFU. The loopback
    // backend stands in until a real adapter is configured; it resolves
    // every signaling request locally.
    let backend = Arc::new(LoopbackMediaBackend);
    let registry = CallRegistryHandle::new(backend, &config, metrics);
    info!("Call registry initialized");

    let app = app_router(registry.clone(), Arc::clone(&health_state));

    // Add /metrics endpoint served by the Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = app.merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind listener");
            format!("Failed to bind {}: {e}", config.bind_address)
        })?;
    info!(addr = %config.bind_address, "Listener bound successfully");

    health_state.set_ready();

    let shutdown_health = Arc::clone(&health_state);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, initiating graceful shutdown...");
        // Mark as not ready immediately so orchestrators stop sending traffic
        shutdown_health.set_not_ready();
    });

    info!("Call Controller running - press Ctrl+C to shutdown");
    server.await.map_err(|e| {
        error!(error = %e, "Server failed");
        e
    })?;

    // Drain every call: close push channels, wake pending requests,
    // release media sessions.
    registry.shutdown();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    info!("Call Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable
/// because without signal handlers we cannot gracefully shut down.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
