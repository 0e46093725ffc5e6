//! Source Decoder Registry
//!
//! Genau ein Decoder pro Quelle, nie geteilt. Der Decoder wird beim ersten
//! Paket einer unbekannten Quelle angelegt. Die Registry gehoert exklusiv
//! dem Ingest-Pfad; dekodiert wird ausserhalb des Queue-Locks, nur das
//! Einreihen der fertigen Frames haelt ihn kurz.
//!
//! Decode-Fehler sind bei verlustbehaftetem Transport normal: das Paket wird
//! verworfen, der Decoder-Zustand bleibt erhalten, geloggt wird nur beim
//! 1., 2., 4., 8. ... Fehler einer Quelle.

use audiobridge_audio::{AudioError, AudioResult, FrameDecoder, OpusDecoder};
use audiobridge_core::{PcmFrame, SourceId};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::registry::SourceQueues;

/// Erzeugt einen neuen Decoder fuer eine bisher unbekannte Quelle
pub type DecoderFactory = Box<dyn Fn() -> AudioResult<Box<dyn FrameDecoder>> + Send>;

/// Ergebnis eines Ingest-Aufrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Paket dekodiert, `frames` PCM-Frames eingereiht
    Enqueued { frames: usize, verworfen: usize },
    /// Quelle steht auf der Ausschlussliste
    Excluded,
}

/// Zaehler der Registry (Snapshot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStatistik {
    pub pakete: u64,
    pub frames: u64,
    pub decode_fehler: u64,
    pub ausgeschlossen: u64,
    pub ueberlauf_verworfen: u64,
}

struct DecoderEntry {
    decoder: Box<dyn FrameDecoder>,
    fehler: u64,
    zuletzt: Instant,
}

/// Registry aller Decoder, indexiert nach Quelle
pub struct DecoderRegistry {
    decoders: HashMap<SourceId, DecoderEntry>,
    queues: SourceQueues,
    factory: DecoderFactory,
    ausgeschlossen: HashSet<SourceId>,
    statistik: DecoderStatistik,
}

impl DecoderRegistry {
    /// Erstellt eine Registry mit eigener Decoder-Factory
    pub fn new(
        queues: SourceQueues,
        factory: DecoderFactory,
        ausgeschlossen: impl IntoIterator<Item = SourceId>,
    ) -> Self {
        Self {
            decoders: HashMap::new(),
            queues,
            factory,
            ausgeschlossen: ausgeschlossen.into_iter().collect(),
            statistik: DecoderStatistik::default(),
        }
    }

    /// Registry mit Opus-Decodern im kanonischen Format
    pub fn opus(queues: SourceQueues, ausgeschlossen: impl IntoIterator<Item = SourceId>) -> Self {
        let factory: DecoderFactory =
            Box::new(|| Ok(Box::new(OpusDecoder::new()?) as Box<dyn FrameDecoder>));
        Self::new(queues, factory, ausgeschlossen)
    }

    /// Dekodiert ein Paket und reiht die Frames in die Queue der Quelle ein
    ///
    /// Ein Decode-Fehler verwirft nur dieses Paket. Der Aufrufer behandelt
    /// `AudioError::CodecFehler` als nicht fatal.
    pub fn ingest(&mut self, source: SourceId, paket: &[u8]) -> AudioResult<IngestOutcome> {
        if self.ausgeschlossen.contains(&source) {
            self.statistik.ausgeschlossen += 1;
            trace!(source = %source, "Paket einer ausgeschlossenen Quelle ignoriert");
            return Ok(IngestOutcome::Excluded);
        }
        self.statistik.pakete += 1;

        let entry = match self.decoders.entry(source) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let decoder = (self.factory)()?;
                debug!(source = %source, "Decoder fuer neue Quelle erstellt");
                e.insert(DecoderEntry {
                    decoder,
                    fehler: 0,
                    zuletzt: Instant::now(),
                })
            }
        };
        entry.zuletzt = Instant::now();

        let pcm = match entry.decoder.decode(paket) {
            Ok(pcm) => pcm,
            Err(e) => {
                entry.fehler += 1;
                self.statistik.decode_fehler += 1;
                if entry.fehler.is_power_of_two() {
                    debug!(
                        source = %source,
                        fehler = %e,
                        anzahl = entry.fehler,
                        "Paket nicht dekodierbar, verworfen"
                    );
                }
                return Err(e);
            }
        };

        if pcm.is_empty() {
            return Err(AudioError::CodecFehler("Paket ohne Samples".into()));
        }

        let frames = PcmFrame::split_samples(&pcm);
        let anzahl = frames.len();
        let verworfen = self.queues.enqueue(source, frames);

        self.statistik.frames += anzahl as u64;
        self.statistik.ueberlauf_verworfen += verworfen as u64;
        trace!(source = %source, frames = anzahl, "Paket dekodiert");

        Ok(IngestOutcome::Enqueued {
            frames: anzahl,
            verworfen,
        })
    }

    /// Verwirft Decoder, die seit `timeout` kein Paket mehr gesehen haben
    pub fn evict_idle(&mut self, jetzt: Instant, timeout: Duration) -> Vec<SourceId> {
        let inaktive: Vec<SourceId> = self
            .decoders
            .iter()
            .filter(|(_, e)| jetzt.saturating_duration_since(e.zuletzt) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &inaktive {
            self.decoders.remove(id);
            info!(source = %id, "Decoder inaktiver Quelle verworfen");
        }
        inaktive
    }

    /// Entfernt alle Decoder und Queues (Ende der Kanal-Session)
    pub fn reset(&mut self) {
        self.decoders.clear();
        self.queues.clear();
    }

    pub fn decoder_anzahl(&self) -> usize {
        self.decoders.len()
    }

    pub fn ist_ausgeschlossen(&self, source: SourceId) -> bool {
        self.ausgeschlossen.contains(&source)
    }

    pub fn statistik(&self) -> DecoderStatistik {
        self.statistik
    }

    pub fn queues(&self) -> &SourceQueues {
        &self.queues
    }
}
