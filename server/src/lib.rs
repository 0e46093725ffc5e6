//! audiobridge-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt mit [`Bridge`] den
//! Lifecycle-Controller bereit, der auch von den Integrationstests
//! genutzt wird.

pub mod config;
pub mod ingress;

use audiobridge_audio::{CaptureDevice, Uplink, UplinkHandle, UplinkStats};
use audiobridge_core::{BridgeError, Result, Shutdown, ShutdownListener};
use audiobridge_observability::{
    observability_server_starten, zaehler_nachziehen, BridgeMetrics, HealthState,
};
use audiobridge_stream::{ForwardSession, SinkConfig, SinkProcess};
use audiobridge_voice::{
    DecoderRegistry, MixerHandle, MixerSnapshot, MixerState, MixerStats, MixingEngine,
    SourceQueues,
};
use bytes::Bytes;
use config::BridgeConfig;
use ingress::{uplink_sender_starten, IngressStats, UdpIngress};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Maximale Wartezeit pro Schleife beim Stoppen
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Abstand der Metrik-Aktualisierung
const METRIK_INTERVALL: Duration = Duration::from_secs(1);

/// Lifecycle-Controller der Bridge
pub struct Bridge;

impl Bridge {
    /// Startet die Bridge mit dem ffmpeg-Sink aus der Konfiguration
    pub async fn start(config: BridgeConfig) -> Result<BridgeHandle> {
        let sink = config.sink_config();
        Self::start_with_sink(config, sink).await
    }

    /// Startet die Bridge mit einem beliebigen Sink-Prozess
    ///
    /// Reihenfolge:
    /// 1. Decoder-Registry anlegen, UDP-Socket binden
    /// 2. Mixer starten
    /// 3. Sink-Prozess und Forward-Session starten
    /// 4. Rueckkanal (Capture + Uplink) starten, bei Fehler nur Forward-Betrieb
    /// 5. Ingress-Loop, Uplink-Sender und Observability starten
    pub async fn start_with_sink(config: BridgeConfig, sink: SinkConfig) -> Result<BridgeHandle> {
        config.validieren()?;
        let shutdown = Shutdown::new();

        // 1. Registry und Socket
        let queues = SourceQueues::new(config.mixer.jitter_depth);
        let registry = DecoderRegistry::opus(queues.clone(), config.ausgeschlossene_quellen());
        let ingress = UdpIngress::binden(config.ingress.bind, registry, config.idle_timeout())
            .await
            .map_err(|e| {
                BridgeError::Ingress(format!("UDP-Bind auf {} fehlgeschlagen: {e}", config.ingress.bind))
            })?;
        let ingress_addr = ingress.lokale_adresse()?;

        // 2. Mixer
        let (egress_tx, egress_rx) = mpsc::channel::<Bytes>(config.mixer.egress_queue_depth);
        let engine = MixingEngine::new(queues, egress_tx, config.mixer_config());
        let mixer_stats = engine.stats();
        let mixer = engine.start(shutdown.listener());

        // 3. Sink
        let sink_process = match SinkProcess::start(&sink) {
            Ok(p) => p,
            Err(e) => {
                shutdown.fire();
                mixer.join().await;
                return Err(e.into());
            }
        };
        let session = ForwardSession::start(sink_process, egress_rx, shutdown.listener());
        let sink_alive = session.sink_alive_flag();

        // 4. Rueckkanal
        let rueckkanal_aktiv = Arc::new(AtomicBool::new(false));
        let (uplink_tx, uplink_rx) = mpsc::channel::<Bytes>(config.capture.uplink_queue_depth);
        let rueckkanal = if config.capture.enabled {
            match rueckkanal_starten(&config, uplink_tx, shutdown.listener()) {
                Ok(r) => {
                    rueckkanal_aktiv.store(true, Ordering::SeqCst);
                    Some(r)
                }
                Err(e) if e.ist_rueckkanal_fehler() => {
                    warn!(fehler = %e, "Rueckkanal nicht verfuegbar, nur Forward-Betrieb");
                    None
                }
                Err(e) => {
                    shutdown.fire();
                    mixer.join().await;
                    session.stop().await;
                    return Err(e);
                }
            }
        } else {
            info!("Rueckkanal deaktiviert");
            None
        };

        // 5. Ingress, Uplink-Sender, Observability
        let mut hintergrund = Vec::new();
        let ingress_stats = ingress.stats();
        let uplink_socket = ingress.socket();
        let ingress_task = ingress.start(shutdown.listener());

        let mut uplink_frames = None;
        match (config.ingress.uplink_target, rueckkanal.is_some()) {
            (Some(ziel), true) => hintergrund.push(uplink_sender_starten(
                uplink_socket,
                ziel,
                uplink_rx,
                shutdown.listener(),
            )),
            (None, true) => uplink_frames = Some(uplink_rx),
            (_, false) => {}
        }

        if config.observability.enabled {
            let metriken = BridgeMetrics::neu()?;
            let health = HealthState::neu(Arc::clone(&sink_alive), Arc::clone(&rueckkanal_aktiv));

            let quellen = MetrikQuellen {
                mixer: mixer_stats,
                ingress: ingress_stats.clone(),
                uplink: rueckkanal.as_ref().map(|r| r.uplink_stats.clone()),
                capture_verworfen: rueckkanal.as_ref().map(|r| r.capture.dropped_counter()),
                sink_alive: Arc::clone(&sink_alive),
                sink_bytes: session.bytes_zaehler(),
            };
            hintergrund.push(tokio::spawn(metriken_nachziehen(
                metriken.clone(),
                quellen,
                shutdown.listener(),
            )));

            let bind = config.observability.bind;
            let listener = shutdown.listener();
            hintergrund.push(tokio::spawn(async move {
                if let Err(e) = observability_server_starten(bind, metriken, health, listener).await {
                    warn!(fehler = %e, "Observability-Server beendet");
                }
            }));
        }

        info!(
            ingress = %ingress_addr,
            sink = %sink.program,
            rueckkanal = rueckkanal.is_some(),
            "Bridge gestartet"
        );

        Ok(BridgeHandle {
            shutdown,
            mixer: Some(mixer),
            session: Some(session),
            rueckkanal,
            ingress: Some(ingress_task),
            ingress_stats,
            uplink_frames,
            hintergrund,
            ingress_addr,
            sink_alive,
            rueckkanal_aktiv,
            gestoppt: false,
        })
    }
}

struct Rueckkanal {
    capture: CaptureDevice,
    uplink: UplinkHandle,
    uplink_stats: Arc<UplinkStats>,
}

fn rueckkanal_starten(
    config: &BridgeConfig,
    uplink_tx: mpsc::Sender<Bytes>,
    shutdown: ShutdownListener,
) -> Result<Rueckkanal> {
    let (capture, queue) = CaptureDevice::start(&config.capture_config())?;
    let uplink = Uplink::new(queue, config.encoder_config(), uplink_tx)?;
    let uplink_stats = uplink.stats();
    Ok(Rueckkanal {
        capture,
        uplink: uplink.start(shutdown),
        uplink_stats,
    })
}

struct MetrikQuellen {
    mixer: Arc<MixerStats>,
    ingress: Arc<IngressStats>,
    uplink: Option<Arc<UplinkStats>>,
    capture_verworfen: Option<Arc<AtomicU64>>,
    sink_alive: Arc<AtomicBool>,
    sink_bytes: Arc<AtomicU64>,
}

// Zieht die Prometheus-Metriken periodisch auf den Stand der Schleifen-Zaehler
async fn metriken_nachziehen(m: BridgeMetrics, q: MetrikQuellen, mut shutdown: ShutdownListener) {
    let mut intervall = tokio::time::interval(METRIK_INTERVALL);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.fired() => break,
            _ = intervall.tick() => {}
        }

        let mixer = q.mixer.snapshot();
        zaehler_nachziehen(&m.mixer_ticks_total, mixer.ticks);
        zaehler_nachziehen(&m.egress_dropped_total, mixer.verworfen);
        m.active_sources.set(mixer.aktive_quellen as i64);

        zaehler_nachziehen(&m.packets_ingested_total, q.ingress.pakete.load(Ordering::Relaxed));
        zaehler_nachziehen(&m.decode_errors_total, q.ingress.decode_fehler.load(Ordering::Relaxed));
        zaehler_nachziehen(
            &m.jitter_dropped_total,
            q.ingress.jitter_verworfen.load(Ordering::Relaxed),
        );

        if let Some(uplink) = &q.uplink {
            let s = uplink.snapshot();
            zaehler_nachziehen(&m.uplink_frames_total, s.gesendet);
            zaehler_nachziehen(&m.uplink_dropped_total, s.verworfen);
        }
        if let Some(verworfen) = &q.capture_verworfen {
            zaehler_nachziehen(&m.capture_dropped_total, verworfen.load(Ordering::Relaxed));
        }

        m.sink_alive.set(i64::from(q.sink_alive.load(Ordering::Relaxed)));
        zaehler_nachziehen(&m.sink_bytes_total, q.sink_bytes.load(Ordering::Relaxed));
    }
}

/// Handle auf die laufende Bridge; `stop` muss explizit aufgerufen werden
pub struct BridgeHandle {
    shutdown: Shutdown,
    mixer: Option<MixerHandle>,
    session: Option<ForwardSession>,
    rueckkanal: Option<Rueckkanal>,
    ingress: Option<JoinHandle<()>>,
    ingress_stats: Arc<IngressStats>,
    uplink_frames: Option<mpsc::Receiver<Bytes>>,
    hintergrund: Vec<JoinHandle<()>>,
    ingress_addr: SocketAddr,
    sink_alive: Arc<AtomicBool>,
    rueckkanal_aktiv: Arc<AtomicBool>,
    gestoppt: bool,
}

impl BridgeHandle {
    /// Adresse, an der komprimierte Pakete erwartet werden
    pub fn ingress_addr(&self) -> SocketAddr {
        self.ingress_addr
    }

    pub fn sink_alive(&self) -> bool {
        self.sink_alive.load(Ordering::SeqCst)
    }

    pub fn reverse_path_active(&self) -> bool {
        self.rueckkanal_aktiv.load(Ordering::SeqCst)
    }

    pub fn mixer_state(&self) -> MixerState {
        self.mixer
            .as_ref()
            .map(MixerHandle::state)
            .unwrap_or(MixerState::Idle)
    }

    pub fn mixer_stats(&self) -> Option<MixerSnapshot> {
        self.mixer.as_ref().map(MixerHandle::stats)
    }

    pub fn ingress_stats(&self) -> &IngressStats {
        &self.ingress_stats
    }

    /// Kodierte Rueckkanal-Pakete, wenn kein `uplink_target` konfiguriert ist
    ///
    /// Kann nur einmal entnommen werden.
    pub fn take_uplink_frames(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.uplink_frames.take()
    }

    /// Geteiltes Shutdown-Signal (z.B. fuer Signal-Handler)
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Stoppt die Bridge; mehrfacher Aufruf ist ein No-Op
    ///
    /// Reihenfolge: Signal ausloesen, Schleifen auslaufen lassen, dann
    /// Capture-Geraet und Sink-Prozess schliessen.
    pub async fn stop(&mut self) {
        if self.gestoppt {
            return;
        }
        self.gestoppt = true;
        info!("Bridge wird gestoppt");
        self.shutdown.fire();

        if let Some(mixer) = self.mixer.take() {
            if tokio::time::timeout(STOP_TIMEOUT, mixer.join()).await.is_err() {
                warn!("Mixer hat nicht rechtzeitig beendet");
            }
        }
        if let Some(ingress) = self.ingress.take() {
            abwarten("Ingress", ingress).await;
        }
        if let Some(mut rueckkanal) = self.rueckkanal.take() {
            if tokio::time::timeout(STOP_TIMEOUT, rueckkanal.uplink.join())
                .await
                .is_err()
            {
                warn!("Uplink hat nicht rechtzeitig beendet");
            }
            rueckkanal.capture.stop();
        }
        for task in self.hintergrund.drain(..) {
            abwarten("Hintergrund-Task", task).await;
        }

        // Externe Prozesse zuletzt
        if let Some(session) = self.session.take() {
            let abbruch = session.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, session.stop()).await.is_err() {
                // Abbruch droppt den Sink, dessen Drop den Prozess beendet
                warn!("Forward-Session hat nicht rechtzeitig beendet, wird abgebrochen");
                abbruch.abort();
            }
        }
        self.rueckkanal_aktiv.store(false, Ordering::SeqCst);
        info!("Bridge gestoppt");
    }
}

async fn abwarten(name: &str, mut task: JoinHandle<()>) {
    match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = name, fehler = %e, "Task abgebrochen"),
        Err(_) => {
            warn!(task = name, "Task hat nicht rechtzeitig beendet, wird abgebrochen");
            task.abort();
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        // Schleifen beenden sich selbst; der Sink wird per kill_on_drop beendet
        self.shutdown.fire();
    }
}
