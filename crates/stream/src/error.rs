//! Fehlertypen des Egress-Sinks

use audiobridge_core::BridgeError;
use thiserror::Error;

/// Fehler beim Betrieb des externen Sink-Prozesses
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink-Prozess '{programm}' konnte nicht gestartet werden: {quelle}")]
    Start {
        programm: String,
        #[source]
        quelle: std::io::Error,
    },

    #[error("Schreiben in den Sink fehlgeschlagen: {0}")]
    Write(#[from] std::io::Error),

    #[error("Sink-Prozess ist beendet")]
    Exited,
}

/// Result-Alias fuer Sink-Operationen
pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl From<SinkError> for BridgeError {
    fn from(e: SinkError) -> Self {
        BridgeError::Sink(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn konvertierung_in_bridge_fehler() {
        let e: BridgeError = SinkError::Exited.into();
        assert!(matches!(e, BridgeError::Sink(ref m) if m == "Sink-Prozess ist beendet"));
    }

    #[test]
    fn start_fehler_nennt_programm() {
        let e = SinkError::Start {
            programm: "ffmpeg".into(),
            quelle: std::io::Error::new(std::io::ErrorKind::NotFound, "nicht gefunden"),
        };
        assert!(e.to_string().contains("'ffmpeg'"));
    }
}
