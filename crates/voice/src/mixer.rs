//! Mixing Engine
//!
//! Fester 20ms-Takt, unabhaengig von der Anzahl aktiver Quellen. Pro Tick:
//! 1. Registry sperren
//! 2. Akkumulator mit 0 initialisieren
//! 3. Von jeder Quelle mit Daten genau einen Frame entnehmen und addieren
//! 4. Lock freigeben
//! 5. Jedes Sample hart auf den i16-Bereich saettigen
//! 6. Als s16le serialisieren und nicht blockierend an die Egress-Queue geben
//!
//! Auch ohne aktive Quelle wird ein Stille-Frame ausgegeben, der Sink
//! erwartet einen lueckenlosen Strom. Ist die Egress-Queue voll, wird der
//! Frame verworfen; der Tick blockiert nie.

use audiobridge_core::{PcmFrame, ShutdownListener, FRAME_SAMPLES, TICK};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, trace};

use crate::registry::{SourceQueues, SOURCE_IDLE_TIMEOUT};

/// Abstand der Pruefung auf inaktive Quellen
pub const EVICTION_INTERVAL: Duration = Duration::from_secs(1);

/// Standard-Tiefe der Egress-Queue in Frames
pub const DEFAULT_EGRESS_DEPTH: usize = 10;

/// Zustand des Mixers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerState {
    Idle,
    Running,
}

/// Konfiguration des Mixers
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Quellen ohne Frame seit dieser Dauer werden entfernt
    pub idle_timeout: Duration,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: SOURCE_IDLE_TIMEOUT,
        }
    }
}

/// Zaehler des Mixers
#[derive(Debug, Default)]
pub struct MixerStats {
    ticks: AtomicU64,
    ausgegeben: AtomicU64,
    verworfen: AtomicU64,
    geclippt: AtomicU64,
    aktive_quellen: AtomicUsize,
}

/// Momentaufnahme der Mixer-Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerSnapshot {
    pub ticks: u64,
    pub ausgegeben: u64,
    pub verworfen: u64,
    pub geclippt: u64,
    pub aktive_quellen: usize,
}

impl MixerStats {
    pub fn snapshot(&self) -> MixerSnapshot {
        MixerSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            ausgegeben: self.ausgegeben.load(Ordering::Relaxed),
            verworfen: self.verworfen.load(Ordering::Relaxed),
            geclippt: self.geclippt.load(Ordering::Relaxed),
            aktive_quellen: self.aktive_quellen.load(Ordering::Relaxed),
        }
    }
}

/// Saettigt einen Summenwert hart auf den i16-Bereich
#[inline]
pub fn clamp_sample(wert: i32) -> i16 {
    wert.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[inline]
fn akkumulieren(akku: &mut [i32; FRAME_SAMPLES], frame: &PcmFrame) {
    for (summe, &sample) in akku.iter_mut().zip(frame.samples().iter()) {
        *summe += sample as i32;
    }
}

// Gibt den fertigen Frame und die Anzahl gesaettigter Samples zurueck
fn aus_akkumulator(akku: &[i32; FRAME_SAMPLES]) -> (PcmFrame, u64) {
    let mut frame = PcmFrame::silence();
    let mut geclippt = 0;
    for (ziel, &summe) in frame.samples_mut().iter_mut().zip(akku.iter()) {
        let wert = clamp_sample(summe);
        if wert as i32 != summe {
            geclippt += 1;
        }
        *ziel = wert;
    }
    (frame, geclippt)
}

/// Mischt beliebig viele Frames zu einem Composite-Frame
///
/// Keine Frames ergeben Stille.
pub fn mix_frames<'a>(frames: impl IntoIterator<Item = &'a PcmFrame>) -> PcmFrame {
    let mut akku = [0i32; FRAME_SAMPLES];
    for frame in frames {
        akkumulieren(&mut akku, frame);
    }
    aus_akkumulator(&akku).0
}

/// Konsumiert die Quell-Queues im festen Takt und speist die Egress-Queue
pub struct MixingEngine {
    queues: SourceQueues,
    egress: mpsc::Sender<Bytes>,
    config: MixerConfig,
    stats: Arc<MixerStats>,
    laeuft: Arc<AtomicBool>,
    letzte_raeumung: Instant,
}

impl MixingEngine {
    pub fn new(queues: SourceQueues, egress: mpsc::Sender<Bytes>, config: MixerConfig) -> Self {
        Self {
            queues,
            egress,
            config,
            stats: Arc::new(MixerStats::default()),
            laeuft: Arc::new(AtomicBool::new(false)),
            letzte_raeumung: Instant::now(),
        }
    }

    pub fn stats(&self) -> Arc<MixerStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> MixerState {
        zustand(&self.laeuft)
    }

    /// Ein Mixer-Tick, gibt den erzeugten Composite-Frame zurueck
    pub fn tick(&mut self) -> PcmFrame {
        let mut akku = [0i32; FRAME_SAMPLES];
        let mut beitraege = 0usize;

        let aktive = {
            let mut map = self.queues.lock();
            for entry in map.values_mut() {
                if let Some(frame) = entry.queue.dequeue() {
                    akkumulieren(&mut akku, &frame);
                    beitraege += 1;
                }
            }
            map.len()
        };

        let (frame, geclippt) = aus_akkumulator(&akku);

        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        self.stats.aktive_quellen.store(aktive, Ordering::Relaxed);
        if geclippt > 0 {
            self.stats.geclippt.fetch_add(geclippt, Ordering::Relaxed);
        }

        match self.egress.try_send(frame.to_le_bytes()) {
            Ok(()) => {
                self.stats.ausgegeben.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.stats.verworfen.fetch_add(1, Ordering::Relaxed);
            }
        }
        trace!(quellen = beitraege, "Mixer-Tick");

        let jetzt = Instant::now();
        if jetzt.saturating_duration_since(self.letzte_raeumung) >= EVICTION_INTERVAL {
            self.letzte_raeumung = jetzt;
            self.queues.evict_idle(jetzt, self.config.idle_timeout);
        }

        frame
    }

    /// Idle -> Running: startet die Schleife als Tokio-Task
    pub fn start(self, shutdown: ShutdownListener) -> MixerHandle {
        let stats = self.stats();
        let laeuft = Arc::clone(&self.laeuft);
        laeuft.store(true, Ordering::SeqCst);
        let task = tokio::spawn(self.run(shutdown));
        MixerHandle {
            task,
            stats,
            laeuft,
        }
    }

    async fn run(mut self, mut shutdown: ShutdownListener) {
        let mut intervall = tokio::time::interval(TICK);
        intervall.set_missed_tick_behavior(MissedTickBehavior::Burst);

        info!(tiefe = self.queues.tiefe(), "Mixer gestartet");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.fired() => break,
                _ = intervall.tick() => {
                    self.tick();
                }
            }
        }
        self.laeuft.store(false, Ordering::SeqCst);
        info!(stats = ?self.stats.snapshot(), "Mixer beendet");
    }
}

fn zustand(laeuft: &AtomicBool) -> MixerState {
    if laeuft.load(Ordering::SeqCst) {
        MixerState::Running
    } else {
        MixerState::Idle
    }
}

/// Handle auf die laufende Mixer-Schleife
pub struct MixerHandle {
    task: JoinHandle<()>,
    stats: Arc<MixerStats>,
    laeuft: Arc<AtomicBool>,
}

impl MixerHandle {
    pub fn state(&self) -> MixerState {
        zustand(&self.laeuft)
    }

    pub fn stats(&self) -> MixerSnapshot {
        self.stats.snapshot()
    }

    /// Wartet auf das Ende der Schleife (nach dem Shutdown-Signal)
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(fehler = %e, "Mixer-Task abgebrochen");
        }
        self.laeuft.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiobridge_core::{Shutdown, SourceId, FRAME_BYTES};

    fn engine(egress_tiefe: usize) -> (MixingEngine, SourceQueues, mpsc::Receiver<Bytes>) {
        let queues = SourceQueues::new(50);
        let (tx, rx) = mpsc::channel(egress_tiefe);
        let engine = MixingEngine::new(queues.clone(), tx, MixerConfig::default());
        (engine, queues, rx)
    }

    #[test]
    fn saettigung_statt_ueberlauf() {
        let a = PcmFrame::constant(24_000);
        let b = PcmFrame::constant(24_000);
        let mix = mix_frames([&a, &b]);
        assert!(mix.samples().iter().all(|&s| s == i16::MAX));

        let a = PcmFrame::constant(-24_000);
        let b = PcmFrame::constant(-24_000);
        let mix = mix_frames([&a, &b]);
        assert!(mix.samples().iter().all(|&s| s == i16::MIN));
    }

    #[test]
    fn clamp_ist_identitaet_im_gueltigen_bereich() {
        for wert in [-32768, -1000, -1, 0, 1, 1000, 32767] {
            assert_eq!(clamp_sample(wert) as i32, wert);
        }
        assert_eq!(clamp_sample(48_000), i16::MAX);
        assert_eq!(clamp_sample(-48_000), i16::MIN);
        assert_eq!(clamp_sample(i32::MAX), i16::MAX);
    }

    #[test]
    fn viele_quellen_bleiben_im_bereich() {
        let frames: Vec<PcmFrame> = (0..64)
            .map(|i| PcmFrame::constant(if i % 3 == 0 { i16::MIN } else { i16::MAX }))
            .collect();
        let mix = mix_frames(&frames);
        // Summe ist positiv: 42 * MAX + 22 * MIN > 0
        assert!(mix.samples().iter().all(|&s| s == i16::MAX));
    }

    #[test]
    fn keine_quellen_ergibt_stille() {
        assert!(mix_frames(std::iter::empty::<&PcmFrame>()).is_silence());

        let (mut engine, _queues, mut rx) = engine(4);
        let frame = engine.tick();
        assert!(frame.is_silence());

        let bytes = rx.try_recv().unwrap();
        assert_eq!(bytes.len(), FRAME_BYTES);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn hoechstens_ein_frame_pro_quelle_und_tick() {
        let (mut engine, queues, _rx) = engine(4);
        queues.enqueue(
            SourceId(1),
            [PcmFrame::constant(1), PcmFrame::constant(2), PcmFrame::constant(3)],
        );
        queues.enqueue(SourceId(2), [PcmFrame::constant(10)]);

        assert_eq!(engine.tick(), PcmFrame::constant(11));
        assert_eq!(queues.fuellstand(SourceId(1)), Some(2));
        assert_eq!(queues.fuellstand(SourceId(2)), Some(0));

        assert_eq!(engine.tick(), PcmFrame::constant(2));
        assert_eq!(engine.tick(), PcmFrame::constant(3));
        assert!(engine.tick().is_silence());
        assert_eq!(engine.stats().snapshot().aktive_quellen, 2);
    }

    #[test]
    fn einzelne_quelle_wird_unveraendert_durchgereicht() {
        let (mut engine, queues, mut rx) = engine(16);

        // Quelle A: 10 Frames mit kleiner, variierender Amplitude; Quelle B schweigt
        let frames_a: Vec<PcmFrame> = (0..10)
            .map(|n| {
                let samples: Vec<i16> = (0..FRAME_SAMPLES)
                    .map(|i| ((i + n * 7) % 21) as i16 - 10)
                    .collect();
                PcmFrame::from_samples(&samples)
            })
            .collect();
        // B ist registriert, aber ihre Queue ist leer
        queues.enqueue(SourceId(2), [PcmFrame::constant(500)]);
        engine.tick();
        rx.try_recv().unwrap();
        assert_eq!(queues.fuellstand(SourceId(2)), Some(0));

        queues.enqueue(SourceId(1), frames_a.clone());

        for erwartet in &frames_a {
            engine.tick();
            assert_eq!(rx.try_recv().unwrap(), erwartet.to_le_bytes());
        }
        assert_eq!(engine.stats().snapshot().aktive_quellen, 2);
    }

    #[test]
    fn volle_egress_queue_blockiert_nicht() {
        let (mut engine, _queues, _rx) = engine(1);
        for _ in 0..5 {
            engine.tick();
        }
        let stats = engine.stats().snapshot();
        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.ausgegeben, 1);
        assert_eq!(stats.verworfen, 4);
    }

    #[test]
    fn geschlossene_egress_queue_mischt_weiter() {
        let (mut engine, _queues, rx) = engine(4);
        drop(rx);
        engine.tick();
        engine.tick();
        assert_eq!(engine.stats().snapshot().verworfen, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn takt_ohne_quellen_ist_stabil() {
        let (engine, _queues, mut rx) = engine(64);
        let shutdown = Shutdown::new();
        let handle = engine.start(shutdown.listener());
        assert_eq!(handle.state(), MixerState::Running);

        let mut zeitpunkte = Vec::with_capacity(50);
        for _ in 0..50 {
            let bytes = rx.recv().await.unwrap();
            assert_eq!(bytes.len(), FRAME_BYTES);
            zeitpunkte.push(Instant::now());
        }

        for paar in zeitpunkte.windows(2) {
            assert_eq!(paar[1] - paar[0], TICK, "Kein Drift zwischen Ticks");
        }

        shutdown.fire();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_beendet_innerhalb_eines_ticks() {
        let (engine, _queues, mut rx) = engine(64);
        let shutdown = Shutdown::new();
        let handle = engine.start(shutdown.listener());

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        shutdown.fire();
        assert!(!shutdown.fire(), "Zweites Ausloesen ist ein No-Op");

        tokio::time::timeout(TICK, handle.join())
            .await
            .expect("Mixer muss innerhalb eines Ticks enden");
    }

    #[tokio::test(start_paused = true)]
    async fn mixer_raeumt_inaktive_quellen() {
        let (mut engine, queues, _rx) = engine(4);
        queues.enqueue(SourceId(5), [PcmFrame::silence()]);

        tokio::time::advance(SOURCE_IDLE_TIMEOUT + EVICTION_INTERVAL).await;
        engine.tick();
        assert_eq!(queues.source_anzahl(), 0);
    }
}
