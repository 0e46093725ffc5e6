//! UDP-Ingress – Stellvertreter fuer die Kanal-Verbindung
//!
//! Jedes Datagramm traegt genau ein komprimiertes Paket einer Quelle:
//!
//! ```text
//! +----------------------+------------------------+
//! | Source-ID (u32, BE)  | Opus-Payload (1..n)    |
//! +----------------------+------------------------+
//! ```
//!
//! Die Empfangs-Loop besitzt die Decoder-Registry exklusiv. Fehlerhafte
//! Datagramme und nicht dekodierbare Pakete werden gezaehlt und verworfen,
//! sie beenden die Loop nie.
//!
//! In Gegenrichtung sendet [`uplink_sender_starten`] die kodierten
//! Rueckkanal-Pakete als rohe Opus-Datagramme an ein festes Ziel.

use audiobridge_audio::AudioError;
use audiobridge_core::{ShutdownListener, SourceId};
use audiobridge_voice::{DecoderRegistry, IngestOutcome};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Groesse des Source-ID-Headers
pub const SOURCE_HEADER_BYTES: usize = 4;

/// Empfangspuffer: Header plus groesstes erwartetes Opus-Paket
const UDP_BUFFER_SIZE: usize = SOURCE_HEADER_BYTES + 4000;

/// Abstand der Pruefung auf inaktive Decoder
const DECODER_RAEUMUNG: Duration = Duration::from_secs(1);

/// Fehler beim Zerlegen eines Datagramms
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatagramFehler {
    #[error("Datagramm zu kurz ({0} Bytes)")]
    ZuKurz(usize),
    #[error("Datagramm ohne Payload")]
    LeererPayload,
}

/// Zerlegt ein Datagramm in Source-ID und Opus-Payload
pub fn parse_datagram(daten: &[u8]) -> Result<(SourceId, &[u8]), DatagramFehler> {
    if daten.len() < SOURCE_HEADER_BYTES {
        return Err(DatagramFehler::ZuKurz(daten.len()));
    }
    let (header, payload) = daten.split_at(SOURCE_HEADER_BYTES);
    if payload.is_empty() {
        return Err(DatagramFehler::LeererPayload);
    }
    let id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    Ok((SourceId(id), payload))
}

/// Baut ein Datagramm (Gegenstueck zu [`parse_datagram`])
pub fn build_datagram(source: SourceId, payload: &[u8]) -> Vec<u8> {
    let mut daten = Vec::with_capacity(SOURCE_HEADER_BYTES + payload.len());
    daten.extend_from_slice(&source.inner().to_be_bytes());
    daten.extend_from_slice(payload);
    daten
}

/// Zaehler des Ingress-Pfads
#[derive(Debug, Default)]
pub struct IngressStats {
    pub pakete: AtomicU64,
    pub ungueltig: AtomicU64,
    pub ausgeschlossen: AtomicU64,
    pub decode_fehler: AtomicU64,
    pub jitter_verworfen: AtomicU64,
}

/// Gebundener UDP-Eingang, noch ohne laufende Loop
pub struct UdpIngress {
    socket: Arc<UdpSocket>,
    registry: DecoderRegistry,
    idle_timeout: Duration,
    stats: Arc<IngressStats>,
}

impl UdpIngress {
    /// Bindet den UDP-Socket
    pub async fn binden(
        bind_addr: SocketAddr,
        registry: DecoderRegistry,
        idle_timeout: Duration,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        tracing::info!(addr = %socket.local_addr()?, "UDP-Ingress gebunden");

        Ok(Self {
            socket: Arc::new(socket),
            registry,
            idle_timeout,
            stats: Arc::new(IngressStats::default()),
        })
    }

    /// Gibt die lokale Bind-Adresse zurueck
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Socket fuer den Versand der Rueckkanal-Pakete
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    pub fn stats(&self) -> Arc<IngressStats> {
        Arc::clone(&self.stats)
    }

    /// Startet die Empfangs-Loop (laeuft bis zum Shutdown-Signal)
    pub fn start(self, shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(self.empfangs_loop(shutdown))
    }

    async fn empfangs_loop(mut self, mut shutdown: ShutdownListener) {
        // Empfangspuffer wird wiederverwendet (kein Heap pro Paket)
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        let mut raeumung = tokio::time::interval(DECODER_RAEUMUNG);
        raeumung.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Ingress-Loop gestartet");

        loop {
            tokio::select! {
                biased;

                // Shutdown-Signal
                _ = shutdown.fired() => break,

                // Eingehendes UDP-Paket
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, absender)) => self.datagram_verarbeiten(&buf[..len], absender),
                        Err(e) => {
                            tracing::error!(fehler = %e, "UDP-Empfangsfehler");
                            // Kurze Pause um Busy-Loop bei persistentem Fehler zu vermeiden
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                    }
                }

                _ = raeumung.tick() => {
                    self.registry.evict_idle(Instant::now(), self.idle_timeout);
                }
            }
        }

        // Kanal-Session endet: Decoder und Queues abbauen
        self.registry.reset();
        tracing::info!(statistik = ?self.registry.statistik(), "Ingress-Loop beendet");
    }

    fn datagram_verarbeiten(&mut self, daten: &[u8], absender: SocketAddr) {
        let (source, payload) = match parse_datagram(daten) {
            Ok(teile) => teile,
            Err(e) => {
                self.stats.ungueltig.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(fehler = %e, absender = %absender, "Ungueltiges Datagramm");
                return;
            }
        };

        self.stats.pakete.fetch_add(1, Ordering::Relaxed);
        match self.registry.ingest(source, payload) {
            Ok(IngestOutcome::Enqueued { verworfen, .. }) => {
                if verworfen > 0 {
                    self.stats
                        .jitter_verworfen
                        .fetch_add(verworfen as u64, Ordering::Relaxed);
                }
            }
            Ok(IngestOutcome::Excluded) => {
                self.stats.ausgeschlossen.fetch_add(1, Ordering::Relaxed);
            }
            // Bereits von der Registry (ratenbegrenzt) geloggt
            Err(AudioError::CodecFehler(_)) => {
                self.stats.decode_fehler.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(source = %source, fehler = %e, "Decoder konnte nicht erstellt werden");
            }
        }
    }
}

/// Sendet Rueckkanal-Pakete an ein festes Ziel
pub fn uplink_sender_starten(
    socket: Arc<UdpSocket>,
    ziel: SocketAddr,
    mut rx: mpsc::Receiver<Bytes>,
    mut shutdown: ShutdownListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(ziel = %ziel, "Uplink-Sender gestartet");
        loop {
            let paket = tokio::select! {
                biased;
                _ = shutdown.fired() => break,
                paket = rx.recv() => match paket {
                    Some(p) => p,
                    None => break,
                },
            };
            match socket.send_to(&paket, ziel).await {
                Ok(_) => {
                    tracing::trace!(bytes = paket.len(), ziel = %ziel, "Uplink-Paket gesendet");
                }
                Err(e) => {
                    tracing::warn!(fehler = %e, ziel = %ziel, "UDP-Sendefehler");
                }
            }
        }
        tracing::debug!(ziel = %ziel, "Uplink-Sender beendet");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiobridge_audio::OPUS_SILENCE_FRAME;
    use audiobridge_core::Shutdown;
    use audiobridge_voice::SourceQueues;

    fn localhost() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[test]
    fn datagram_zerlegen() {
        let daten = build_datagram(SourceId(0x0102_0304), &[0xF8, 0xFF, 0xFE]);
        assert_eq!(&daten[..4], &[1, 2, 3, 4]);

        let (source, payload) = parse_datagram(&daten).unwrap();
        assert_eq!(source, SourceId(0x0102_0304));
        assert_eq!(payload, &[0xF8, 0xFF, 0xFE]);
    }

    #[test]
    fn datagram_fehlerfaelle() {
        assert_eq!(parse_datagram(&[1, 2]), Err(DatagramFehler::ZuKurz(2)));
        assert_eq!(parse_datagram(&[0, 0, 0, 1]), Err(DatagramFehler::LeererPayload));
    }

    async fn warte_bis<F: Fn() -> bool>(bedingung: F) {
        for _ in 0..200 {
            if bedingung() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("Bedingung nicht erfuellt");
    }

    #[tokio::test]
    async fn ingress_dekodiert_und_reiht_ein() {
        let queues = SourceQueues::new(50);
        let registry = DecoderRegistry::opus(queues.clone(), [SourceId(13)]);
        let ingress = UdpIngress::binden(localhost(), registry, Duration::from_secs(30))
            .await
            .expect("Ingress muss binden koennen");
        let addr = ingress.lokale_adresse().unwrap();
        let stats = ingress.stats();

        let shutdown = Shutdown::new();
        let task = ingress.start(shutdown.listener());

        let sender = UdpSocket::bind(localhost()).await.unwrap();
        sender
            .send_to(&build_datagram(SourceId(1), &OPUS_SILENCE_FRAME), addr)
            .await
            .unwrap();
        sender.send_to(&[9, 9], addr).await.unwrap();
        sender
            .send_to(&build_datagram(SourceId(1), &[0x03]), addr)
            .await
            .unwrap();
        sender
            .send_to(&build_datagram(SourceId(13), &OPUS_SILENCE_FRAME), addr)
            .await
            .unwrap();

        warte_bis(|| {
            stats.ungueltig.load(Ordering::Relaxed) == 1
                && stats.decode_fehler.load(Ordering::Relaxed) == 1
                && stats.ausgeschlossen.load(Ordering::Relaxed) == 1
        })
        .await;

        assert_eq!(queues.fuellstand(SourceId(1)), Some(1));
        assert_eq!(queues.fuellstand(SourceId(13)), None);

        shutdown.fire();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        // Teardown der Kanal-Session
        assert_eq!(queues.source_anzahl(), 0);
    }

    #[tokio::test]
    async fn uplink_pakete_gehen_ans_ziel() {
        let ziel = UdpSocket::bind(localhost()).await.unwrap();
        let ziel_addr = ziel.local_addr().unwrap();
        let socket = Arc::new(UdpSocket::bind(localhost()).await.unwrap());

        let (tx, rx) = mpsc::channel(4);
        let shutdown = Shutdown::new();
        let task = uplink_sender_starten(socket, ziel_addr, rx, shutdown.listener());

        tx.send(Bytes::from_static(&OPUS_SILENCE_FRAME)).await.unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), ziel.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], &OPUS_SILENCE_FRAME);

        shutdown.fire();
        task.await.unwrap();
    }
}
