//! Forward-Session
//!
//! Leert die Egress-Queue des Mixers in den Sink-Prozess. Die Session endet
//! bei Shutdown, bei explizitem `stop`, wenn die Egress-Queue geschlossen
//! wird oder beim ersten Schreibfehler. Nach einem Schreibfehler mischt der
//! Mixer weiter in die (dann volle) Queue, bis die Session explizit
//! gestoppt und ggf. neu gestartet wird.

use audiobridge_core::{SessionId, Shutdown, ShutdownListener};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, trace, warn};

use crate::sink::SinkProcess;

/// Grund fuer das Ende einer Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnde {
    Shutdown,
    Gestoppt,
    EgressGeschlossen,
    SinkFehler,
}

/// Laufende Weiterleitung Egress-Queue -> Sink
pub struct ForwardSession {
    id: SessionId,
    stop: Shutdown,
    sink_alive: Arc<AtomicBool>,
    geschrieben: Arc<AtomicU64>,
    task: JoinHandle<(SessionEnde, mpsc::Receiver<Bytes>)>,
}

impl ForwardSession {
    /// Startet den Writer-Task; der Sink gehoert ab jetzt der Session
    pub fn start(
        sink: SinkProcess,
        egress: mpsc::Receiver<Bytes>,
        shutdown: ShutdownListener,
    ) -> Self {
        let id = SessionId::new();
        let stop = Shutdown::new();
        let sink_alive = sink.alive_flag();
        let geschrieben = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(weiterleiten(
            id,
            sink,
            egress,
            shutdown,
            stop.listener(),
            Arc::clone(&geschrieben),
        ));

        info!(session = %id, "Forward-Session gestartet");
        Self {
            id,
            stop,
            sink_alive,
            geschrieben,
            task,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Gibt zurueck ob der Sink-Prozess noch laeuft
    pub fn sink_alive(&self) -> bool {
        self.sink_alive.load(Ordering::SeqCst)
    }

    pub fn sink_alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.sink_alive)
    }

    /// Anzahl bisher in den Sink geschriebener Bytes
    pub fn bytes_geschrieben(&self) -> u64 {
        self.geschrieben.load(Ordering::Relaxed)
    }

    pub fn bytes_zaehler(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.geschrieben)
    }

    /// Gibt true zurueck wenn der Writer-Task bereits beendet ist
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Handle zum harten Abbruch des Writer-Tasks
    ///
    /// Der Abbruch droppt den Sink-Prozess, dessen Drop den Prozess beendet.
    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Beendet die Session und den Sink-Prozess
    ///
    /// Gibt den Empfaenger der Egress-Queue zurueck, damit eine neue
    /// Session darauf gestartet werden kann.
    pub async fn stop(self) -> Option<(SessionEnde, mpsc::Receiver<Bytes>)> {
        self.stop.fire();
        match self.task.await {
            Ok(ergebnis) => Some(ergebnis),
            Err(e) => {
                tracing::error!(session = %self.id, fehler = %e, "Writer-Task abgebrochen");
                None
            }
        }
    }
}

async fn weiterleiten(
    id: SessionId,
    mut sink: SinkProcess,
    mut egress: mpsc::Receiver<Bytes>,
    mut shutdown: ShutdownListener,
    mut stop: ShutdownListener,
    geschrieben: Arc<AtomicU64>,
) -> (SessionEnde, mpsc::Receiver<Bytes>) {
    let ende = loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.fired() => break SessionEnde::Shutdown,
            _ = stop.fired() => break SessionEnde::Gestoppt,
            frame = egress.recv() => match frame {
                Some(frame) => frame,
                None => break SessionEnde::EgressGeschlossen,
            },
        };

        // Ein Sink, der stdin nicht mehr liest, darf den Stop nicht aufhalten
        let ergebnis = tokio::select! {
            biased;
            _ = shutdown.fired() => break SessionEnde::Shutdown,
            _ = stop.fired() => break SessionEnde::Gestoppt,
            ergebnis = sink.write(&frame) => ergebnis,
        };

        match ergebnis {
            Ok(n) => {
                geschrieben.fetch_add(n as u64, Ordering::Relaxed);
                trace!(bytes = n, "Frame an Sink uebergeben");
            }
            Err(e) => {
                warn!(session = %id, fehler = %e, "Sink nicht beschreibbar, Session beendet");
                break SessionEnde::SinkFehler;
            }
        }
    };

    sink.stop().await;
    info!(
        session = %id,
        ende = ?ende,
        bytes = geschrieben.load(Ordering::Relaxed),
        "Forward-Session beendet"
    );
    (ende, egress)
}
