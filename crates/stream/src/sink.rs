//! Egress Sink Adapter
//!
//! Besitzt genau einen externen Sink-Prozess pro Streaming-Session und
//! stellt dessen stdin als reine Schreib-Pipe bereit. Ein Hintergrund-Task
//! beobachtet das Prozessende und markiert den Adapter als unbrauchbar,
//! ohne dass der Aufrufer pollen muss.
//!
//! Kein globales Prozess-Register: `start` gibt ein Handle zurueck, `stop`
//! wird auf genau diesem Handle aufgerufen.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SinkError, SinkResult};

/// Wartezeit nach dem Schliessen von stdin, bevor der Prozess beendet wird
pub const STOP_GRACE: Duration = Duration::from_millis(500);

/// Programm und Argumente des Sink-Prozesses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl SinkConfig {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// ffmpeg: s16le 48 kHz Stereo von stdin -> AAC in MPEG-TS an `destination_url`
    pub fn ffmpeg(ffmpeg_path: &str, destination_url: &str, bitrate: &str) -> Self {
        Self::new(ffmpeg_path, ffmpeg_args(destination_url, bitrate))
    }

    /// Vollstaendige Kommandozeile fuer das Log
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Argumentliste fuer ffmpeg im kanonischen Eingangsformat
pub fn ffmpeg_args(destination_url: &str, bitrate: &str) -> Vec<String> {
    [
        "-re", "-f", "s16le", "-ar", "48000", "-ac", "2", "-i", "pipe:0", "-c:a", "aac", "-b:a",
        bitrate, "-f", "mpegts", destination_url,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Laufender Sink-Prozess mit Exit-Watcher
pub struct SinkProcess {
    programm: String,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    alive: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<Option<ExitStatus>>>,
}

impl SinkProcess {
    /// Startet den Sink-Prozess; muss innerhalb einer Tokio-Runtime laufen
    pub fn start(config: &SinkConfig) -> SinkResult<Self> {
        info!(kommando = %config.command_line(), "Starte Sink-Prozess");

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|quelle| SinkError::Start {
                programm: config.program.clone(),
                quelle,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let alive = Arc::new(AtomicBool::new(true));
        let (kill_tx, kill_rx) = oneshot::channel();

        let watcher = tokio::spawn(prozess_beobachten(
            child,
            kill_rx,
            Arc::clone(&alive),
            config.program.clone(),
        ));

        debug!(pid = ?pid, programm = %config.program, "Sink-Prozess gestartet");

        Ok(Self {
            programm: config.program.clone(),
            pid,
            stdin,
            alive,
            kill_tx: Some(kill_tx),
            watcher: Some(watcher),
        })
    }

    /// Schreibt Bytes in die Pipe; schlaegt fehl wenn der Sink beendet ist
    ///
    /// Blockiert nur auf dem Puffer der Pipe selbst.
    pub async fn write(&mut self, daten: &[u8]) -> SinkResult<usize> {
        if !self.is_alive() {
            return Err(SinkError::Exited);
        }
        let stdin = self.stdin.as_mut().ok_or(SinkError::Exited)?;
        stdin.write_all(daten).await?;
        Ok(daten.len())
    }

    /// Gibt zurueck ob der Prozess noch laeuft
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Geteiltes Flag fuer Health-Checks
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Schliesst stdin und beendet den Prozess notfalls hart (idempotent)
    pub async fn stop(&mut self) {
        let Some(mut watcher) = self.watcher.take() else {
            return;
        };

        // stdin schliessen -> EOF fuer den Sink
        drop(self.stdin.take());

        let status = match tokio::time::timeout(STOP_GRACE, &mut watcher).await {
            Ok(ergebnis) => ergebnis.ok().flatten(),
            Err(_) => {
                if let Some(kill_tx) = self.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
                watcher.await.ok().flatten()
            }
        };
        self.kill_tx = None;
        self.alive.store(false, Ordering::SeqCst);

        info!(programm = %self.programm, status = ?status, "Sink-Prozess gestoppt");
    }
}

impl Drop for SinkProcess {
    fn drop(&mut self) {
        // Watcher toetet den Prozess, sobald der Kill-Kanal geschlossen ist
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

// Hintergrund-Task: wartet auf Prozessende oder Kill-Anforderung
async fn prozess_beobachten(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    alive: Arc<AtomicBool>,
    programm: String,
) -> Option<ExitStatus> {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(fehler = %e, "Sink-Prozess bereits beendet");
            }
            child.wait().await
        }
    };
    alive.store(false, Ordering::SeqCst);

    match status {
        Ok(status) if status.success() => {
            info!(programm = %programm, "Sink-Prozess regulaer beendet");
            Some(status)
        }
        Ok(status) => {
            warn!(programm = %programm, status = %status, "Sink-Prozess beendet");
            Some(status)
        }
        Err(e) => {
            warn!(programm = %programm, fehler = %e, "Warten auf Sink-Prozess fehlgeschlagen");
            None
        }
    }
}
