//! Fehlertypen der AudioBridge
//!
//! Zentraler Fehler-Enum fuer Start-Fehler des Gesamtsystems.
//! Die Crates `audio` und `stream` definieren eigene Fehler und
//! konvertieren via `From` hierher.

use thiserror::Error;

/// Globaler Result-Alias
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Alle Fehler, die beim Starten oder Stoppen der Bridge auftreten koennen
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Audiofehler: {0}")]
    Audio(String),

    #[error("Sink-Fehler: {0}")]
    Sink(String),

    #[error("Ingress-Fehler: {0}")]
    Ingress(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl BridgeError {
    /// Gibt true zurueck wenn der Fehler nur den Rueckkanal betrifft
    ///
    /// Solche Fehler degradieren die Bridge auf reinen Forward-Betrieb.
    pub fn ist_rueckkanal_fehler(&self) -> bool {
        matches!(self, Self::Audio(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = BridgeError::Sink("ffmpeg nicht gefunden".into());
        assert_eq!(e.to_string(), "Sink-Fehler: ffmpeg nicht gefunden");
    }

    #[test]
    fn rueckkanal_erkennung() {
        assert!(BridgeError::Audio("kein Geraet".into()).ist_rueckkanal_fehler());
        assert!(!BridgeError::Sink("tot".into()).ist_rueckkanal_fehler());
    }

    #[test]
    fn io_konvertierung() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "belegt");
        let e: BridgeError = io.into();
        assert!(matches!(e, BridgeError::Io(_)));
    }
}
