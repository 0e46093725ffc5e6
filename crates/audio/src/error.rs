//! Fehlertypen fuer die Audio-Schicht

use audiobridge_core::BridgeError;
use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Schicht
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for BridgeError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::Konfiguration(msg) => BridgeError::Konfiguration(msg),
            other => BridgeError::Audio(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geraetefehler_degradiert_nur_den_rueckkanal() {
        let e: BridgeError = AudioError::GeraetNichtGefunden("VLX_VirtualSink.monitor".into()).into();
        assert!(e.ist_rueckkanal_fehler());

        let e: BridgeError = AudioError::StreamFehler("kein 48 kHz".into()).into();
        assert!(e.ist_rueckkanal_fehler());
    }

    #[test]
    fn konfigurationsfehler_bleibt_fatal() {
        let e: BridgeError = AudioError::Konfiguration("Bitrate".into()).into();
        assert!(matches!(e, BridgeError::Konfiguration(_)));
        assert!(!e.ist_rueckkanal_fehler());
    }
}
