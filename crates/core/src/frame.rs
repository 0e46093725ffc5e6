//! Kanonisches PCM-Format
//!
//! Alle Pfade der Bridge arbeiten mit 20ms-Frames: 48 kHz, Stereo,
//! interleaved, 16-Bit signed. Ein Frame hat damit immer exakt
//! 960 Samples pro Kanal bzw. 1920 Samples gesamt (3840 Bytes).

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Abtastrate in Hz
pub const SAMPLE_RATE: u32 = 48_000;
/// Kanalanzahl (interleaved Stereo)
pub const CHANNELS: usize = 2;
/// Samples pro Kanal in einem 20ms-Frame
pub const FRAME_SAMPLES_PER_CHANNEL: usize = 960;
/// Samples gesamt in einem Frame
pub const FRAME_SAMPLES: usize = FRAME_SAMPLES_PER_CHANNEL * CHANNELS;
/// Serialisierte Groesse eines Frames (s16le)
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;
/// Taktperiode aller Echtzeit-Schleifen
pub const TICK: Duration = Duration::from_millis(20);

/// Ein 20ms-Frame PCM, Laenge per Typ garantiert
#[derive(Clone, PartialEq, Eq)]
pub struct PcmFrame {
    samples: Box<[i16; FRAME_SAMPLES]>,
}

impl PcmFrame {
    /// Erstellt einen Stille-Frame
    pub fn silence() -> Self {
        Self {
            samples: Box::new([0; FRAME_SAMPLES]),
        }
    }

    /// Erstellt einen Frame mit konstanter Amplitude auf allen Samples
    pub fn constant(amplitude: i16) -> Self {
        Self {
            samples: Box::new([amplitude; FRAME_SAMPLES]),
        }
    }

    /// Uebernimmt bis zu `FRAME_SAMPLES` Samples, der Rest wird mit Stille aufgefuellt
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut frame = Self::silence();
        let n = samples.len().min(FRAME_SAMPLES);
        frame.samples[..n].copy_from_slice(&samples[..n]);
        frame
    }

    /// Zerlegt einen beliebig langen Sample-Puffer in aufeinanderfolgende Frames
    ///
    /// Ein unvollstaendiger letzter Block wird mit Stille aufgefuellt.
    pub fn split_samples(samples: &[i16]) -> Vec<Self> {
        samples.chunks(FRAME_SAMPLES).map(Self::from_samples).collect()
    }

    pub fn samples(&self) -> &[i16; FRAME_SAMPLES] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16; FRAME_SAMPLES] {
        &mut self.samples
    }

    /// Gibt true zurueck wenn alle Samples 0 sind
    pub fn is_silence(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Hoechster Absolutwert im Frame
    pub fn peak(&self) -> u16 {
        self.samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    /// Serialisiert den Frame als s16le (Byte-Reihenfolge des Sinks)
    pub fn to_le_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_BYTES);
        for &sample in self.samples.iter() {
            buf.put_i16_le(sample);
        }
        buf.freeze()
    }
}

impl Default for PcmFrame {
    fn default() -> Self {
        Self::silence()
    }
}

impl std::fmt::Debug for PcmFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmFrame")
            .field("samples", &FRAME_SAMPLES)
            .field("peak", &self.peak())
            .finish()
    }
}
