//! Prometheus-kompatible Metriken der AudioBridge
//!
//! Registrierte Metriken:
//! - `audiobridge_mixer_ticks_total` – Counter: Mixer-Ticks
//! - `audiobridge_egress_dropped_total` – Counter: Verworfene Composite-Frames
//! - `audiobridge_packets_ingested_total` – Counter: Eingegangene Pakete
//! - `audiobridge_decode_errors_total` – Counter: Nicht dekodierbare Pakete
//! - `audiobridge_jitter_dropped_total` – Counter: Durch Jitter-Ueberlauf verworfene Frames
//! - `audiobridge_active_sources` – Gauge: Quellen mit Queue
//! - `audiobridge_uplink_frames_total` – Counter: Gesendete Rueckkanal-Pakete
//! - `audiobridge_uplink_dropped_total` – Counter: Verworfene Rueckkanal-Pakete
//! - `audiobridge_capture_dropped_total` – Counter: Verworfene Capture-Frames
//! - `audiobridge_sink_alive` – Gauge: 1 wenn der Sink-Prozess laeuft
//! - `audiobridge_sink_bytes_total` – Counter: In den Sink geschriebene Bytes
//!
//! Die Schleifen fuehren eigene atomare Zaehler; ein Hintergrund-Task zieht
//! die Prometheus-Counter periodisch auf deren Stand nach.

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Prometheus-Metriken der Bridge
#[derive(Clone)]
pub struct BridgeMetrics {
    pub registry: Arc<Registry>,

    // Forward-Pfad
    pub mixer_ticks_total: IntCounter,
    pub egress_dropped_total: IntCounter,
    pub packets_ingested_total: IntCounter,
    pub decode_errors_total: IntCounter,
    pub jitter_dropped_total: IntCounter,
    pub active_sources: IntGauge,

    // Rueckkanal
    pub uplink_frames_total: IntCounter,
    pub uplink_dropped_total: IntCounter,
    pub capture_dropped_total: IntCounter,

    // Sink
    pub sink_alive: IntGauge,
    pub sink_bytes_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, hilfe: &str) -> Result<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

impl BridgeMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            mixer_ticks_total: counter(
                &registry,
                "audiobridge_mixer_ticks_total",
                "Anzahl ausgefuehrter Mixer-Ticks",
            )?,
            egress_dropped_total: counter(
                &registry,
                "audiobridge_egress_dropped_total",
                "Verworfene Composite-Frames (Egress-Queue voll)",
            )?,
            packets_ingested_total: counter(
                &registry,
                "audiobridge_packets_ingested_total",
                "Eingegangene komprimierte Pakete",
            )?,
            decode_errors_total: counter(
                &registry,
                "audiobridge_decode_errors_total",
                "Nicht dekodierbare Pakete",
            )?,
            jitter_dropped_total: counter(
                &registry,
                "audiobridge_jitter_dropped_total",
                "Durch Jitter-Queue-Ueberlauf verworfene Frames",
            )?,
            active_sources: gauge(
                &registry,
                "audiobridge_active_sources",
                "Anzahl Quellen mit Jitter-Queue",
            )?,
            uplink_frames_total: counter(
                &registry,
                "audiobridge_uplink_frames_total",
                "Gesendete Rueckkanal-Pakete",
            )?,
            uplink_dropped_total: counter(
                &registry,
                "audiobridge_uplink_dropped_total",
                "Verworfene Rueckkanal-Pakete (Queue voll)",
            )?,
            capture_dropped_total: counter(
                &registry,
                "audiobridge_capture_dropped_total",
                "Verworfene Capture-Frames (Capture-Queue voll)",
            )?,
            sink_alive: gauge(
                &registry,
                "audiobridge_sink_alive",
                "1 wenn der Sink-Prozess laeuft, sonst 0",
            )?,
            sink_bytes_total: counter(
                &registry,
                "audiobridge_sink_bytes_total",
                "In den Sink geschriebene Bytes",
            )?,
            registry: Arc::new(registry),
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Zieht einen Counter auf einen monoton wachsenden Gesamtstand nach
pub fn zaehler_nachziehen(counter: &IntCounter, gesamt: u64) {
    let aktuell = counter.get();
    if gesamt > aktuell {
        counter.inc_by(gesamt - aktuell);
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: BridgeMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<BridgeMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = BridgeMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn zwei_instanzen_kollidieren_nicht() {
        // Jede Instanz hat eine eigene Registry
        let a = BridgeMetrics::neu().unwrap();
        let b = BridgeMetrics::neu().unwrap();
        a.mixer_ticks_total.inc();
        assert_eq!(b.mixer_ticks_total.get(), 0);
    }

    #[test]
    fn zaehler_nachziehen_ist_monoton() {
        let metriken = BridgeMetrics::neu().unwrap();
        zaehler_nachziehen(&metriken.mixer_ticks_total, 50);
        assert_eq!(metriken.mixer_ticks_total.get(), 50);

        zaehler_nachziehen(&metriken.mixer_ticks_total, 75);
        assert_eq!(metriken.mixer_ticks_total.get(), 75);

        // Kleinerer Stand (z.B. nach Neustart einer Schleife) aendert nichts
        zaehler_nachziehen(&metriken.mixer_ticks_total, 10);
        assert_eq!(metriken.mixer_ticks_total.get(), 75);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = BridgeMetrics::neu().unwrap();
        metriken.active_sources.set(3);
        metriken.sink_alive.set(1);
        metriken.egress_dropped_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("audiobridge_active_sources 3"));
        assert!(output.contains("audiobridge_sink_alive 1"));
        assert!(output.contains("audiobridge_egress_dropped_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = BridgeMetrics::neu().unwrap();
        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        for name in [
            "audiobridge_mixer_ticks_total",
            "audiobridge_egress_dropped_total",
            "audiobridge_packets_ingested_total",
            "audiobridge_decode_errors_total",
            "audiobridge_jitter_dropped_total",
            "audiobridge_active_sources",
            "audiobridge_uplink_frames_total",
            "audiobridge_uplink_dropped_total",
            "audiobridge_capture_dropped_total",
            "audiobridge_sink_alive",
            "audiobridge_sink_bytes_total",
        ] {
            assert!(namen.contains(&name), "{name} fehlt");
        }
    }
}
