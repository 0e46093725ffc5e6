//! Bridge-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass die Bridge ohne Konfigurationsdatei
//! lauffaehig ist. Ungueltige Werte lassen das Laden fehlschlagen.

use audiobridge_audio::{CaptureConfig, EncoderConfig, OpusApplication};
use audiobridge_core::{BridgeError, SourceId};
use audiobridge_stream::SinkConfig;
use audiobridge_voice::MixerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Hoechstens so viele Quellen duerfen ausgeschlossen werden
pub const MAX_EXCLUDED_SOURCES: usize = 2;

/// Vollstaendige Bridge-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Forward-Pfad: Ziel und ffmpeg
    pub streaming: StreamingEinstellungen,
    /// Jitter Queues und Mixer
    pub mixer: MixerEinstellungen,
    /// Rueckkanal: Capture-Geraet und Encoder
    pub capture: CaptureEinstellungen,
    /// UDP-Eingang fuer komprimierte Pakete
    pub ingress: IngressEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Forward-Pfad
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingEinstellungen {
    /// Ziel des Sink-Prozesses (z.B. srt://host:port)
    pub destination_url: String,
    /// AAC-Bitrate fuer ffmpeg (`-b:a`)
    pub bitrate: String,
    /// Quellen, deren Pakete ignoriert werden
    pub excluded_sources: Vec<u32>,
    /// Pfad zur ffmpeg-Binary
    pub ffmpeg_path: String,
}

impl Default for StreamingEinstellungen {
    fn default() -> Self {
        Self {
            destination_url: "srt://127.0.0.1:9000".into(),
            bitrate: "128k".into(),
            excluded_sources: Vec::new(),
            ffmpeg_path: "ffmpeg".into(),
        }
    }
}

/// Jitter Queues und Mixer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerEinstellungen {
    /// Tiefe jeder Jitter Queue in Frames
    pub jitter_depth: usize,
    /// Tiefe der Egress-Queue zwischen Mixer und Sink
    pub egress_queue_depth: usize,
    /// Quellen ohne Frame seit so vielen Sekunden werden entfernt
    pub idle_timeout_secs: u64,
}

impl Default for MixerEinstellungen {
    fn default() -> Self {
        Self {
            jitter_depth: 50,
            egress_queue_depth: 10,
            idle_timeout_secs: 30,
        }
    }
}

/// Rueckkanal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureEinstellungen {
    /// Aktiviert den Rueckkanal
    pub enabled: bool,
    /// Bevorzugtes Capture-Geraet (Teilstring)
    pub device: String,
    /// Fallback-Geraete in Prioritaetsreihenfolge
    pub fallback_devices: Vec<String>,
    /// Opus-Bitrate in Bit/s
    pub bitrate_bps: i32,
    /// Tiefe der Capture-Queue in Frames
    pub queue_depth: usize,
    /// Tiefe der ausgehenden Queue fuer kodierte Pakete
    pub uplink_queue_depth: usize,
}

impl Default for CaptureEinstellungen {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        Self {
            enabled: true,
            device: capture.device,
            fallback_devices: capture.fallback_devices,
            bitrate_bps: EncoderConfig::default().bitrate_bps,
            queue_depth: capture.queue_depth,
            uplink_queue_depth: 10,
        }
    }
}

/// UDP-Eingang
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressEinstellungen {
    /// Bind-Adresse fuer eingehende Pakete
    pub bind: SocketAddr,
    /// Ziel fuer Rueckkanal-Pakete (optional)
    pub uplink_target: Option<SocketAddr>,
}

impl Default for IngressEinstellungen {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5004)),
            uplink_target: None,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub enabled: bool,
    /// Bind-Adresse fuer Metriken und Health
    pub bind: SocketAddr,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([127, 0, 0, 1], 9300)),
        }
    }
}

/// Herkunft einer geladenen Konfiguration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigQuelle {
    Datei,
    /// Datei fehlt, alle Werte sind Standardwerte
    Standardwerte,
}

impl BridgeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    ///
    /// Fehlt die Datei, wird die Standardkonfiguration zurueckgegeben. Die
    /// Quelle wird mitgeliefert, damit der Aufrufer nach der Logging-
    /// Initialisierung darauf hinweisen kann.
    pub fn laden(pfad: &str) -> anyhow::Result<(Self, ConfigQuelle)> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config = Self::aus_toml(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok((config, ConfigQuelle::Datei))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok((Self::default(), ConfigQuelle::Standardwerte))
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Parst und validiert eine Konfiguration aus einem TOML-String
    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(inhalt)?;
        config.validieren()?;
        Ok(config)
    }

    /// Prueft die Werte, die serde allein nicht abdecken kann
    pub fn validieren(&self) -> audiobridge_core::Result<()> {
        let fehler = |msg: String| -> audiobridge_core::Result<()> {
            Err(BridgeError::Konfiguration(msg))
        };

        if self.streaming.excluded_sources.len() > MAX_EXCLUDED_SOURCES {
            return fehler(format!(
                "Hoechstens {MAX_EXCLUDED_SOURCES} ausgeschlossene Quellen erlaubt (waren: {})",
                self.streaming.excluded_sources.len()
            ));
        }
        if self.streaming.destination_url.trim().is_empty() {
            return fehler("streaming.destination_url darf nicht leer sein".into());
        }
        if self.mixer.jitter_depth == 0 {
            return fehler("mixer.jitter_depth muss groesser als 0 sein".into());
        }
        if self.mixer.egress_queue_depth == 0 {
            return fehler("mixer.egress_queue_depth muss groesser als 0 sein".into());
        }
        if self.mixer.idle_timeout_secs == 0 {
            return fehler("mixer.idle_timeout_secs muss groesser als 0 sein".into());
        }
        if self.capture.queue_depth == 0 || self.capture.uplink_queue_depth == 0 {
            return fehler("capture.queue_depth und capture.uplink_queue_depth muessen groesser als 0 sein".into());
        }
        self.encoder_config()
            .validieren()
            .map_err(BridgeError::Konfiguration)?;
        Ok(())
    }

    /// Kommandozeile des ffmpeg-Sinks
    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig::ffmpeg(
            &self.streaming.ffmpeg_path,
            &self.streaming.destination_url,
            &self.streaming.bitrate,
        )
    }

    pub fn mixer_config(&self) -> MixerConfig {
        MixerConfig {
            idle_timeout: self.idle_timeout(),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.mixer.idle_timeout_secs)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            device: self.capture.device.clone(),
            fallback_devices: self.capture.fallback_devices.clone(),
            queue_depth: self.capture.queue_depth,
        }
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            bitrate_bps: self.capture.bitrate_bps,
            application: OpusApplication::Audio,
        }
    }

    pub fn ausgeschlossene_quellen(&self) -> Vec<SourceId> {
        self.streaming
            .excluded_sources
            .iter()
            .copied()
            .map(SourceId)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = BridgeConfig::default();
        cfg.validieren().unwrap();
        assert_eq!(cfg.streaming.destination_url, "srt://127.0.0.1:9000");
        assert_eq!(cfg.mixer.jitter_depth, 50);
        assert_eq!(cfg.mixer.egress_queue_depth, 10);
        assert_eq!(cfg.capture.device, "VLX_VirtualSink.monitor");
        assert_eq!(cfg.capture.bitrate_bps, 96_000);
        assert_eq!(cfg.ingress.bind.port(), 5004);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [streaming]
            destination_url = "srt://10.0.0.5:7000"
            excluded_sources = [4711, 42]

            [mixer]
            egress_queue_depth = 100

            [ingress]
            uplink_target = "127.0.0.1:6000"
        "#;
        let cfg = BridgeConfig::aus_toml(toml).unwrap();
        assert_eq!(cfg.streaming.destination_url, "srt://10.0.0.5:7000");
        assert_eq!(cfg.ausgeschlossene_quellen(), vec![SourceId(4711), SourceId(42)]);
        assert_eq!(cfg.mixer.egress_queue_depth, 100);
        assert_eq!(cfg.ingress.uplink_target, Some("127.0.0.1:6000".parse().unwrap()));
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.mixer.jitter_depth, 50);
        assert_eq!(cfg.streaming.bitrate, "128k");
    }

    #[test]
    fn zu_viele_ausgeschlossene_quellen() {
        let toml = r#"
            [streaming]
            excluded_sources = [1, 2, 3]
        "#;
        let err = BridgeConfig::aus_toml(toml).unwrap_err();
        assert!(err.to_string().contains("ausgeschlossene Quellen"));
    }

    #[test]
    fn null_tiefe_wird_abgelehnt() {
        let mut cfg = BridgeConfig::default();
        cfg.mixer.jitter_depth = 0;
        assert!(matches!(cfg.validieren(), Err(BridgeError::Konfiguration(_))));

        let mut cfg = BridgeConfig::default();
        cfg.capture.uplink_queue_depth = 0;
        assert!(cfg.validieren().is_err());
    }

    #[test]
    fn ungueltige_encoder_bitrate() {
        let mut cfg = BridgeConfig::default();
        cfg.capture.bitrate_bps = 600_000;
        assert!(matches!(cfg.validieren(), Err(BridgeError::Konfiguration(_))));
    }

    #[test]
    fn ungueltige_adresse_scheitert_beim_parsen() {
        let toml = r#"
            [ingress]
            bind = "kein-socket"
        "#;
        assert!(BridgeConfig::aus_toml(toml).is_err());
    }

    #[test]
    fn sink_kommandozeile_aus_config() {
        let cfg = BridgeConfig::default();
        let sink = cfg.sink_config();
        assert_eq!(sink.program, "ffmpeg");
        assert!(sink.command_line().ends_with("-b:a 128k -f mpegts srt://127.0.0.1:9000"));
    }

    #[test]
    fn fehlende_datei_ergibt_standardwerte() {
        let (cfg, quelle) = BridgeConfig::laden("/nicht/vorhanden/audiobridge.toml").unwrap();
        assert_eq!(quelle, ConfigQuelle::Standardwerte);
        assert_eq!(cfg.mixer.jitter_depth, 50);
    }

    #[test]
    fn vorhandene_datei_wird_gelesen() {
        let dir = tempfile::TempDir::new().unwrap();
        let pfad = dir.path().join("audiobridge.toml");
        std::fs::write(&pfad, "[mixer]\njitter_depth = 20\n").unwrap();

        let (cfg, quelle) = BridgeConfig::laden(pfad.to_str().unwrap()).unwrap();
        assert_eq!(quelle, ConfigQuelle::Datei);
        assert_eq!(cfg.mixer.jitter_depth, 20);
    }
}
