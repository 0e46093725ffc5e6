//! Per-Source Jitter Queue
//!
//! Kleiner FIFO aus dekodierten PCM-Frames pro Quelle. Gleicht
//! unregelmaessige Ankunftszeiten aus, damit der Mixer im festen Takt
//! konsumieren kann. Keine adaptive Logik:
//! - Ueberlauf verwirft den aeltesten ungelesenen Frame, nie den neuesten
//! - Unterlauf liefert `None`, der Mixer fuegt dann nichts hinzu
//!
//! Nicht thread-safe, die Synchronisation uebernimmt [`crate::SourceQueues`].

use audiobridge_core::PcmFrame;
use std::collections::VecDeque;

/// Standard-Tiefe in Frames (50 x 20ms = 1s)
pub const DEFAULT_JITTER_DEPTH: usize = 50;

/// Statistiken einer Jitter Queue (Snapshot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterQueueStatistik {
    /// Anzahl eingereihter Frames gesamt
    pub empfangen: u64,
    /// Anzahl entnommener Frames
    pub abgespielt: u64,
    /// Anzahl wegen Ueberlauf verworfener Frames
    pub verworfen: u64,
}

/// Begrenzter FIFO mit Drop-Oldest-Semantik
#[derive(Debug)]
pub struct JitterQueue {
    frames: VecDeque<PcmFrame>,
    kapazitaet: usize,
    statistik: JitterQueueStatistik,
}

impl JitterQueue {
    /// Erstellt eine leere Queue; Kapazitaet 0 wird auf 1 angehoben
    pub fn new(kapazitaet: usize) -> Self {
        let kapazitaet = kapazitaet.max(1);
        Self {
            frames: VecDeque::with_capacity(kapazitaet),
            kapazitaet,
            statistik: JitterQueueStatistik::default(),
        }
    }

    /// Haengt einen Frame an, blockiert nie
    ///
    /// Gibt true zurueck wenn dafuer der aelteste Frame verworfen wurde.
    pub fn enqueue(&mut self, frame: PcmFrame) -> bool {
        self.statistik.empfangen += 1;
        let ueberlauf = self.frames.len() >= self.kapazitaet;
        if ueberlauf {
            self.frames.pop_front();
            self.statistik.verworfen += 1;
        }
        self.frames.push_back(frame);
        ueberlauf
    }

    /// Entnimmt den aeltesten Frame oder `None` wenn leer
    pub fn dequeue(&mut self) -> Option<PcmFrame> {
        let frame = self.frames.pop_front()?;
        self.statistik.abgespielt += 1;
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }

    pub fn statistik(&self) -> JitterQueueStatistik {
        self.statistik
    }
}

impl Default for JitterQueue {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER_DEPTH)
    }
}
