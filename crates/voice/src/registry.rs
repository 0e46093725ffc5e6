//! Registry der Quell-Queues
//!
//! Einzige Struktur, die von zwei Schleifen beruehrt wird: der Ingest-Pfad
//! schreibt, der Mixer-Tick liest. Geschuetzt durch genau einen groben
//! Lock ueber die gesamte Map, nicht durch Locks pro Queue. Damit bleibt der
//! kritische Abschnitt des Mixers auf die Anzahl aktiver Quellen begrenzt.
//!
//! Queues werden beim ersten Frame einer unbekannten Quelle angelegt und
//! nach `idle_timeout` ohne neuen Frame wieder entfernt.

use audiobridge_core::{PcmFrame, SourceId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::jitter_buffer::JitterQueue;

/// Timeout fuer inaktive Quellen (30 Sekunden ohne Frame)
pub const SOURCE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Zustand einer einzelnen Quelle in der Registry
#[derive(Debug)]
pub struct SourceEntry {
    pub queue: JitterQueue,
    /// Zeitpunkt des letzten eingereihten Frames
    pub letzter_frame: Instant,
}

impl SourceEntry {
    fn new(tiefe: usize) -> Self {
        Self {
            queue: JitterQueue::new(tiefe),
            letzter_frame: Instant::now(),
        }
    }

    /// Prueft ob die Quelle als inaktiv gilt
    pub fn ist_inaktiv(&self, jetzt: Instant, timeout: Duration) -> bool {
        jetzt.saturating_duration_since(self.letzter_frame) >= timeout
    }
}

/// Geteilte Map SourceId -> Jitter Queue (clonebar, ein Lock)
#[derive(Clone, Debug)]
pub struct SourceQueues {
    inner: Arc<Mutex<HashMap<SourceId, SourceEntry>>>,
    tiefe: usize,
}

impl SourceQueues {
    /// Erstellt eine leere Registry; jede Queue fasst `tiefe` Frames
    pub fn new(tiefe: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            tiefe,
        }
    }

    /// Reiht Frames einer Quelle ein, legt die Queue bei Bedarf an
    ///
    /// Gibt die Anzahl durch Ueberlauf verworfener Frames zurueck.
    pub fn enqueue(&self, source: SourceId, frames: impl IntoIterator<Item = PcmFrame>) -> usize {
        let mut map = self.inner.lock();
        let tiefe = self.tiefe;
        let entry = map.entry(source).or_insert_with(|| {
            tracing::debug!(source = %source, "Neue Quelle registriert");
            SourceEntry::new(tiefe)
        });

        let mut verworfen = 0;
        for frame in frames {
            if entry.queue.enqueue(frame) {
                verworfen += 1;
            }
        }
        entry.letzter_frame = Instant::now();
        verworfen
    }

    /// Sperrt die Registry fuer einen Mixer-Tick
    ///
    /// Der Guard muss vor der Weiterverarbeitung des Mix-Ergebnisses
    /// freigegeben werden.
    pub fn lock(&self) -> MutexGuard<'_, HashMap<SourceId, SourceEntry>> {
        self.inner.lock()
    }

    /// Entfernt Quellen ohne Frame seit `timeout`
    ///
    /// Gibt die Liste der entfernten Quellen zurueck.
    pub fn evict_idle(&self, jetzt: Instant, timeout: Duration) -> Vec<SourceId> {
        let mut map = self.inner.lock();
        let inaktive: Vec<SourceId> = map
            .iter()
            .filter(|(_, e)| e.ist_inaktiv(jetzt, timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &inaktive {
            map.remove(id);
        }
        drop(map);

        for id in &inaktive {
            tracing::info!(source = %id, "Inaktive Quelle entfernt (Timeout)");
        }
        inaktive
    }

    /// Entfernt alle Quellen (Ende der Kanal-Session)
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Anzahl registrierter Quellen
    pub fn source_anzahl(&self) -> usize {
        self.inner.lock().len()
    }

    /// Fuellstand der Queue einer Quelle, `None` wenn unbekannt
    pub fn fuellstand(&self, source: SourceId) -> Option<usize> {
        self.inner.lock().get(&source).map(|e| e.queue.len())
    }

    pub fn tiefe(&self) -> usize {
        self.tiefe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quelle_wird_lazy_angelegt() {
        let queues = SourceQueues::new(50);
        assert_eq!(queues.source_anzahl(), 0);
        assert_eq!(queues.fuellstand(SourceId(7)), None);

        queues.enqueue(SourceId(7), [PcmFrame::constant(1)]);
        assert_eq!(queues.source_anzahl(), 1);
        assert_eq!(queues.fuellstand(SourceId(7)), Some(1));
    }

    #[test]
    fn ueberlauf_wird_gezaehlt() {
        let queues = SourceQueues::new(2);
        let frames = (0..5).map(PcmFrame::constant);
        assert_eq!(queues.enqueue(SourceId(1), frames), 3);
        assert_eq!(queues.fuellstand(SourceId(1)), Some(2));
    }

    #[test]
    fn quellen_sind_getrennt() {
        let queues = SourceQueues::new(10);
        queues.enqueue(SourceId(1), [PcmFrame::constant(1)]);
        queues.enqueue(SourceId(2), [PcmFrame::constant(2), PcmFrame::constant(2)]);

        let mut map = queues.lock();
        assert_eq!(map.get_mut(&SourceId(1)).unwrap().queue.dequeue(), Some(PcmFrame::constant(1)));
        assert_eq!(map.get(&SourceId(2)).unwrap().queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn inaktive_quellen_werden_entfernt() {
        let queues = SourceQueues::new(10);
        queues.enqueue(SourceId(1), [PcmFrame::silence()]);

        tokio::time::advance(Duration::from_secs(20)).await;
        queues.enqueue(SourceId(2), [PcmFrame::silence()]);

        tokio::time::advance(Duration::from_secs(15)).await;
        let entfernt = queues.evict_idle(Instant::now(), SOURCE_IDLE_TIMEOUT);
        assert_eq!(entfernt, vec![SourceId(1)]);
        assert_eq!(queues.source_anzahl(), 1);
        assert_eq!(queues.fuellstand(SourceId(2)), Some(1));
    }

    #[test]
    fn clear_entfernt_alles() {
        let queues = SourceQueues::new(10);
        queues.enqueue(SourceId(1), [PcmFrame::silence()]);
        queues.enqueue(SourceId(2), [PcmFrame::silence()]);
        queues.clear();
        assert_eq!(queues.source_anzahl(), 0);
    }
}
