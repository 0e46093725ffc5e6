//! Health-Check-Endpunkt der AudioBridge
//!
//! Endpoint: `GET /health`
//! - healthy: Sink laeuft, Rueckkanal aktiv
//! - degraded: Sink laeuft, Rueckkanal aus (nur Forward-Betrieb)
//! - unhealthy: Sink-Prozess beendet

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub sink_alive: bool,
    pub reverse_path_active: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
///
/// Die Flags gehoeren den jeweiligen Komponenten und werden hier nur gelesen.
#[derive(Clone)]
pub struct HealthState {
    start: Arc<Instant>,
    started_at: DateTime<Utc>,
    sink_alive: Arc<AtomicBool>,
    rueckkanal_aktiv: Arc<AtomicBool>,
}

impl HealthState {
    pub fn neu(sink_alive: Arc<AtomicBool>, rueckkanal_aktiv: Arc<AtomicBool>) -> Self {
        Self {
            start: Arc::new(Instant::now()),
            started_at: Utc::now(),
            sink_alive,
            rueckkanal_aktiv,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    /// Aktueller Gesamtstatus
    pub fn status(&self) -> HealthStatus {
        if !self.sink_alive.load(Ordering::Relaxed) {
            HealthStatus::Unhealthy
        } else if !self.rueckkanal_aktiv.load(Ordering::Relaxed) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn antwort(&self) -> HealthResponse {
        HealthResponse {
            status: self.status(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at,
            uptime_seconds: self.uptime_seconds(),
            sink_alive: self.sink_alive.load(Ordering::Relaxed),
            reverse_path_active: self.rueckkanal_aktiv.load(Ordering::Relaxed),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Bridge-Status zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();

    let http_status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK, // 200 auch bei degraded (Probe soll nicht failen)
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(sink: bool, rueckkanal: bool) -> HealthState {
        HealthState::neu(
            Arc::new(AtomicBool::new(sink)),
            Arc::new(AtomicBool::new(rueckkanal)),
        )
    }

    #[test]
    fn status_ableitung() {
        assert_eq!(state(true, true).status(), HealthStatus::Healthy);
        assert_eq!(state(true, false).status(), HealthStatus::Degraded);
        assert_eq!(state(false, true).status(), HealthStatus::Unhealthy);
        assert_eq!(state(false, false).status(), HealthStatus::Unhealthy);
    }

    #[test]
    fn flags_werden_live_gelesen() {
        let sink = Arc::new(AtomicBool::new(true));
        let s = HealthState::neu(Arc::clone(&sink), Arc::new(AtomicBool::new(true)));
        assert_eq!(s.status(), HealthStatus::Healthy);
        sink.store(false, Ordering::Relaxed);
        assert_eq!(s.status(), HealthStatus::Unhealthy);
    }

    #[test]
    fn health_response_serialisierung() {
        let json = serde_json::to_string(&state(true, false).antwort()).unwrap();
        assert!(json.contains("\"status\":\"degraded\""));
        assert!(json.contains("\"sink_alive\":true"));
        assert!(json.contains("\"reverse_path_active\":false"));
        assert!(json.contains("\"started_at\""));
    }

    #[test]
    fn health_response_deserialisierung() {
        let json = r#"{"status":"unhealthy","version":"0.1.0","started_at":"2026-01-01T00:00:00Z","uptime_seconds":100,"sink_alive":false,"reverse_path_active":true}"#;
        let response: HealthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.uptime_seconds, 100);
        assert!(!response.sink_alive);
    }
}
