//! Opus Encoder/Decoder Wrapper
//!
//! Kapselt audiopus fuer das kanonische Format der Bridge
//! (48 kHz, Stereo, i16 interleaved). Der Decoder akzeptiert Pakete
//! beliebiger Dauer bis 120ms, der Encoder erwartet exakt einen 20ms-Frame.

use audiobridge_core::{PcmFrame, CHANNELS};
use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Maximale Groesse eines kodierten Pakets
pub const MAX_PACKET_BYTES: usize = 4000;

/// Decode-Puffer: 120ms Stereo (groesste zulaessige Opus-Paketdauer)
pub const MAX_DECODED_SAMPLES: usize = 5760 * CHANNELS;

/// Kanonischer Opus-Stille-Frame
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Opus-Anwendungsmodus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    /// Optimiert fuer Sprachverstaendlichkeit
    Voip,
    /// Optimiert fuer allgemeine Audio-Qualitaet (Musik, Overlays)
    #[default]
    Audio,
    /// Minimale Verarbeitungsverzoegerung
    LowDelay,
}

/// Konfiguration des Rueckkanal-Encoders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Ziel-Bitrate in Bit/s (6000–510000)
    pub bitrate_bps: i32,
    /// Anwendungsmodus
    pub application: OpusApplication,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            bitrate_bps: 96_000,
            application: OpusApplication::Audio,
        }
    }
}

impl EncoderConfig {
    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if !(6_000..=510_000).contains(&self.bitrate_bps) {
            return Err(format!(
                "Bitrate muss zwischen 6000 und 510000 bit/s liegen (war: {})",
                self.bitrate_bps
            ));
        }
        Ok(())
    }
}

/// Alles was komprimierte Frames in PCM verwandeln kann
///
/// Implementiert von [`OpusDecoder`]; die Registry haelt pro Quelle
/// genau eine Instanz.
pub trait FrameDecoder: Send {
    /// Dekodiert ein Paket zu interleaved Stereo-PCM beliebiger Laenge
    fn decode(&mut self, packet: &[u8]) -> AudioResult<Vec<i16>>;
}

/// Opus-Encoder: kodiert 20ms-PCM-Frames zu Opus-Paketen
pub struct OpusEncoder {
    encoder: Encoder,
    config: EncoderConfig,
    output: Vec<u8>,
}

impl OpusEncoder {
    /// Erstellt einen neuen Encoder mit der gegebenen Konfiguration
    pub fn new(config: EncoderConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;

        let mut encoder = Encoder::new(
            SampleRate::Hz48000,
            Channels::Stereo,
            application_to_audiopus(config.application),
        )
        .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(config.bitrate_bps))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        debug!(
            bitrate = config.bitrate_bps,
            application = ?config.application,
            "OpusEncoder erstellt"
        );

        Ok(Self {
            encoder,
            config,
            output: vec![0u8; MAX_PACKET_BYTES],
        })
    }

    /// Kodiert einen Frame; das Ergebnis ist hoechstens `MAX_PACKET_BYTES` gross
    pub fn encode(&mut self, frame: &PcmFrame) -> AudioResult<Bytes> {
        let written = self
            .encoder
            .encode(&frame.samples()[..], &mut self.output)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&self.output[..written]))
    }

    /// Gibt die aktuelle Konfiguration zurueck
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }
}

/// Opus-Decoder: dekodiert Opus-Pakete zu i16-PCM
pub struct OpusDecoder {
    decoder: Decoder,
    output: Vec<i16>,
}

impl OpusDecoder {
    /// Erstellt einen Decoder im kanonischen Format (48 kHz Stereo)
    pub fn new() -> AudioResult<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Stereo)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        Ok(Self {
            decoder,
            output: vec![0i16; MAX_DECODED_SAMPLES],
        })
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, packet: &[u8]) -> AudioResult<Vec<i16>> {
        if packet.is_empty() {
            return Err(AudioError::CodecFehler("leeres Paket".into()));
        }

        let per_channel = self
            .decoder
            .decode(Some(packet), &mut self.output[..], false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        // Rueckgabe zaehlt Samples pro Kanal
        Ok(self.output[..per_channel * CHANNELS].to_vec())
    }
}

fn application_to_audiopus(app: OpusApplication) -> Application {
    match app {
        OpusApplication::Voip => Application::Voip,
        OpusApplication::Audio => Application::Audio,
        OpusApplication::LowDelay => Application::LowDelay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiobridge_core::FRAME_SAMPLES;

    fn sinus_frame() -> PcmFrame {
        let samples: Vec<i16> = (0..FRAME_SAMPLES)
            .map(|i| ((i as f32 / 20.0).sin() * 8000.0) as i16)
            .collect();
        PcmFrame::from_samples(&samples)
    }

    #[test]
    fn encoder_standard_konfiguration() {
        let enc = OpusEncoder::new(EncoderConfig::default()).unwrap();
        assert_eq!(enc.config().bitrate_bps, 96_000);
        assert_eq!(enc.config().application, OpusApplication::Audio);
    }

    #[test]
    fn encoder_ungueltige_bitrate() {
        let config = EncoderConfig {
            bitrate_bps: 1_000,
            ..Default::default()
        };
        assert!(matches!(
            OpusEncoder::new(config),
            Err(AudioError::Konfiguration(_))
        ));
    }

    #[test]
    fn encoder_decoder_roundtrip_laenge() {
        let mut enc = OpusEncoder::new(EncoderConfig::default()).unwrap();
        let mut dec = OpusDecoder::new().unwrap();

        let paket = enc.encode(&sinus_frame()).expect("Encoding sollte funktionieren");
        assert!(!paket.is_empty());
        assert!(paket.len() <= MAX_PACKET_BYTES);

        let pcm = dec.decode(&paket).expect("Decoding sollte funktionieren");
        assert_eq!(pcm.len(), FRAME_SAMPLES);
    }

    #[test]
    fn decoder_lehnt_leeres_paket_ab() {
        let mut dec = OpusDecoder::new().unwrap();
        assert!(dec.decode(&[]).is_err());
    }

    #[test]
    fn decoder_ueberlebt_korruptes_paket() {
        let mut enc = OpusEncoder::new(EncoderConfig::default()).unwrap();
        let mut dec = OpusDecoder::new().unwrap();

        // Code-3-Paket ohne Frame-Count-Byte ist ungueltig
        assert!(dec.decode(&[0x03]).is_err());

        // Derselbe Decoder muss danach weiter funktionieren
        let paket = enc.encode(&sinus_frame()).unwrap();
        assert_eq!(dec.decode(&paket).unwrap().len(), FRAME_SAMPLES);
    }

    #[test]
    fn stille_frame_ist_dekodierbar() {
        let mut dec = OpusDecoder::new().unwrap();
        let pcm = dec.decode(&OPUS_SILENCE_FRAME).unwrap();
        assert_eq!(pcm.len(), FRAME_SAMPLES);
    }
}
