//! # audiobridge-observability
//!
//! Observability-Crate fuer die AudioBridge:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus};
pub use logging::{logging_initialisieren, LogFormat};
pub use metrics::{metrics_router, zaehler_nachziehen, BridgeMetrics};

use anyhow::Result;
use audiobridge_core::ShutdownListener;
use std::net::SocketAddr;

/// Startet den Observability-HTTP-Server (Metriken + Health)
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
/// - `GET /health`  – Health-Check JSON
///
/// Laeuft bis zum Shutdown-Signal.
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: BridgeMetrics,
    health: HealthState,
    mut shutdown: ShutdownListener,
) -> Result<()> {
    use axum::Router;

    let app = Router::new()
        .merge(metrics_router(metriken))
        .merge(health_router(health));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.fired().await })
        .await?;
    tracing::info!("Observability-Server beendet");
    Ok(())
}
