//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `AB_LOG_LEVEL`: Log-Level oder EnvFilter-Direktive, Standard: info
//! - `AB_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Die Werte aus der Konfigurationsdatei gelten nur, wenn die
//! Umgebungsvariablen nicht gesetzt sind.

use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Level
pub const ENV_LOG_LEVEL: &str = "AB_LOG_LEVEL";
/// Umgebungsvariable fuer das Log-Format
pub const ENV_LOG_FORMAT: &str = "AB_LOG_FORMAT";

/// Ausgabeformat der Logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            anders => Err(format!("Unbekanntes Log-Format: {anders}")),
        }
    }
}

/// Initialisiert das Logging-System.
///
/// `AB_LOG_LEVEL` / `AB_LOG_FORMAT` haben Vorrang vor `level` / `format`.
/// Ungueltige Filter fallen auf `info`, unbekannte Formate auf `text` zurueck.
pub fn logging_initialisieren(level: &str, format: &str) -> anyhow::Result<()> {
    let level = aufloesen(std::env::var(ENV_LOG_LEVEL).ok(), level);
    let format = aufloesen(std::env::var(ENV_LOG_FORMAT).ok(), format);

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format.parse::<LogFormat>().unwrap_or_default() {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Logging konnte nicht initialisiert werden: {e}"))
}

// Umgebungswert vor Konfigurationswert, leere Werte zaehlen als nicht gesetzt
fn aufloesen(env: Option<String>, konfig: &str) -> String {
    env.filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| konfig.to_string())
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}
