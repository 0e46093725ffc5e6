//! Uplink – Rueckkanal von System-Audio in den Sprachkanal
//!
//! Fester 20ms-Takt: pro Tick wird genau ein Frame aus der Capture-Queue
//! geholt (oder bei Unterlauf Stille eingesetzt), kodiert und nicht
//! blockierend an die ausgehende Queue uebergeben. Ist diese voll, wird
//! das Paket verworfen. Die ersten Ticks senden den Opus-Stille-Frame,
//! damit der Transport auf der Gegenseite geoeffnet wird.

use audiobridge_core::{PcmFrame, ShutdownListener, TICK};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::capture::CaptureQueue;
use crate::codec::{EncoderConfig, OpusEncoder, OPUS_SILENCE_FRAME};
use crate::error::AudioResult;

/// Anzahl Stille-Pakete vor dem ersten kodierten Frame
pub const PRIMING_FRAMES: u32 = 5;

/// Zaehler des Uplinks (lock-free, von aussen lesbar)
#[derive(Debug, Default)]
pub struct UplinkStats {
    ticks: AtomicU64,
    gesendet: AtomicU64,
    verworfen: AtomicU64,
    stille_eingesetzt: AtomicU64,
    encode_fehler: AtomicU64,
}

/// Momentaufnahme der Uplink-Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkSnapshot {
    pub ticks: u64,
    pub gesendet: u64,
    pub verworfen: u64,
    pub stille_eingesetzt: u64,
    pub encode_fehler: u64,
}

impl UplinkStats {
    pub fn snapshot(&self) -> UplinkSnapshot {
        UplinkSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            gesendet: self.gesendet.load(Ordering::Relaxed),
            verworfen: self.verworfen.load(Ordering::Relaxed),
            stille_eingesetzt: self.stille_eingesetzt.load(Ordering::Relaxed),
            encode_fehler: self.encode_fehler.load(Ordering::Relaxed),
        }
    }
}

/// Capture/Encode-Schleife des Rueckkanals
pub struct Uplink {
    capture: CaptureQueue,
    encoder: OpusEncoder,
    outbound: mpsc::Sender<Bytes>,
    stats: Arc<UplinkStats>,
    priming_rest: u32,
}

impl Uplink {
    pub fn new(
        capture: CaptureQueue,
        encoder: EncoderConfig,
        outbound: mpsc::Sender<Bytes>,
    ) -> AudioResult<Self> {
        Ok(Self {
            capture,
            encoder: OpusEncoder::new(encoder)?,
            outbound,
            stats: Arc::new(UplinkStats::default()),
            priming_rest: PRIMING_FRAMES,
        })
    }

    pub fn stats(&self) -> Arc<UplinkStats> {
        Arc::clone(&self.stats)
    }

    /// Ein Takt: hoechstens ein Frame wird entnommen, genau ein Paket erzeugt
    pub fn tick(&mut self) {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        let paket = if self.priming_rest > 0 {
            self.priming_rest -= 1;
            // Queue trotzdem leeren, sonst startet der Uplink mit Verzoegerung
            let _ = self.capture.try_recv();
            Bytes::from_static(&OPUS_SILENCE_FRAME)
        } else {
            let frame = match self.capture.try_recv() {
                Ok(frame) => frame,
                Err(_) => {
                    self.stats.stille_eingesetzt.fetch_add(1, Ordering::Relaxed);
                    PcmFrame::silence()
                }
            };
            match self.encoder.encode(&frame) {
                Ok(paket) => paket,
                Err(e) => {
                    let anzahl = self.stats.encode_fehler.fetch_add(1, Ordering::Relaxed) + 1;
                    if anzahl.is_power_of_two() {
                        debug!(fehler = %e, anzahl, "Opus-Encoding fehlgeschlagen");
                    }
                    return;
                }
            }
        };

        match self.outbound.try_send(paket) {
            Ok(()) => {
                self.stats.gesendet.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.stats.verworfen.fetch_add(1, Ordering::Relaxed);
                trace!("Ausgehende Queue voll – Uplink-Paket verworfen");
            }
        }
    }

    /// Startet die Schleife als Tokio-Task
    pub fn start(self, shutdown: ShutdownListener) -> UplinkHandle {
        let stats = self.stats();
        let task = tokio::spawn(self.run(shutdown));
        UplinkHandle { task, stats }
    }

    async fn run(mut self, mut shutdown: ShutdownListener) {
        let mut intervall = tokio::time::interval(TICK);
        intervall.set_missed_tick_behavior(MissedTickBehavior::Burst);

        info!("Uplink gestartet");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.fired() => break,
                _ = intervall.tick() => self.tick(),
            }
        }
        info!(stats = ?self.stats.snapshot(), "Uplink beendet");
    }
}

/// Handle auf die laufende Uplink-Schleife
pub struct UplinkHandle {
    task: JoinHandle<()>,
    stats: Arc<UplinkStats>,
}

impl UplinkHandle {
    pub fn stats(&self) -> UplinkSnapshot {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wartet auf das Ende der Schleife (nach dem Shutdown-Signal)
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(fehler = %e, "Uplink-Task abgebrochen");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiobridge_core::Shutdown;
    use crossbeam_channel::bounded;

    fn uplink(
        outbound_tiefe: usize,
    ) -> (Uplink, crossbeam_channel::Sender<PcmFrame>, mpsc::Receiver<Bytes>) {
        let (cap_tx, cap_rx) = bounded(10);
        let (out_tx, out_rx) = mpsc::channel(outbound_tiefe);
        let uplink = Uplink::new(cap_rx, EncoderConfig::default(), out_tx).unwrap();
        (uplink, cap_tx, out_rx)
    }

    #[test]
    fn priming_sendet_stille_frames() {
        let (mut up, _cap, mut rx) = uplink(16);
        for _ in 0..PRIMING_FRAMES {
            up.tick();
        }
        for _ in 0..PRIMING_FRAMES {
            assert_eq!(&rx.try_recv().unwrap()[..], &OPUS_SILENCE_FRAME);
        }
    }

    #[test]
    fn unterlauf_setzt_stille_ein() {
        let (mut up, _cap, mut rx) = uplink(16);
        for _ in 0..PRIMING_FRAMES + 3 {
            up.tick();
        }
        let stats = up.stats().snapshot();
        assert_eq!(stats.stille_eingesetzt, 3);
        assert_eq!(stats.gesendet, u64::from(PRIMING_FRAMES) + 3);

        // Auch bei Unterlauf geht pro Tick genau ein Paket raus
        let mut anzahl = 0;
        while rx.try_recv().is_ok() {
            anzahl += 1;
        }
        assert_eq!(anzahl, PRIMING_FRAMES + 3);
    }

    #[test]
    fn pro_tick_hoechstens_ein_capture_frame() {
        let (mut up, cap, _rx) = uplink(16);
        for _ in 0..PRIMING_FRAMES {
            up.tick();
        }
        cap.send(PcmFrame::constant(1000)).unwrap();
        cap.send(PcmFrame::constant(1000)).unwrap();
        up.tick();
        assert_eq!(up.capture.len(), 1, "Nur ein Frame darf pro Tick entnommen werden");
        assert_eq!(up.stats().snapshot().stille_eingesetzt, 0);
    }

    #[test]
    fn volle_ausgangs_queue_verwirft() {
        let (mut up, _cap, _rx) = uplink(1);
        for _ in 0..10 {
            up.tick();
        }
        let stats = up.stats().snapshot();
        assert_eq!(stats.gesendet, 1);
        assert_eq!(stats.verworfen, 9);
        assert_eq!(stats.ticks, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_beendet_innerhalb_eines_ticks() {
        let (up, _cap, mut rx) = uplink(64);
        let shutdown = Shutdown::new();
        let handle = up.start(shutdown.listener());

        // Einige Ticks laufen lassen
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }

        shutdown.fire();
        tokio::time::timeout(TICK, handle.join())
            .await
            .expect("Uplink muss innerhalb eines Ticks enden");

        // Zweites Ausloesen ist harmlos
        assert!(!shutdown.fire());
    }
}
