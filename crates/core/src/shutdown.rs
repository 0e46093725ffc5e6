//! Geteiltes Shutdown-Signal
//!
//! Ein einziges Signal fuer alle Schleifen (Mixer, Uplink, Ingress,
//! Sink-Writer). Basiert auf einem `watch`-Kanal: jeder Listener sieht
//! den Zustand, auch wenn er erst nach dem Ausloesen erstellt wurde.
//! Mehrfaches Ausloesen ist ein No-Op.

use std::sync::Arc;
use tokio::sync::watch;

/// Ausloeseseite des Shutdown-Signals (clonebar)
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Erstellt ein neues, noch nicht ausgeloestes Signal
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Loest das Signal aus
    ///
    /// Gibt true zurueck wenn dieser Aufruf das Signal ausgeloest hat,
    /// false wenn es bereits ausgeloest war.
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Gibt zurueck ob das Signal bereits ausgeloest wurde
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Erstellt einen neuen Listener fuer eine Schleife
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Empfangsseite des Shutdown-Signals, eine pro Schleife
#[derive(Clone, Debug)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Wartet bis das Signal ausgeloest wurde
    ///
    /// Kehrt auch zurueck, wenn alle `Shutdown`-Handles gedroppt wurden.
    /// Cancel-safe, kann in `tokio::select!` verwendet werden.
    pub async fn fired(&mut self) {
        let _ = self.rx.wait_for(|ausgeloest| *ausgeloest).await;
    }

    /// Nicht-blockierende Abfrage
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn doppeltes_ausloesen_ist_noop() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_fired());
        assert!(shutdown.fire());
        assert!(!shutdown.fire(), "Zweites Ausloesen darf nichts aendern");
        assert!(shutdown.is_fired());
    }

    #[tokio::test]
    async fn listener_wird_geweckt() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();

        let task = tokio::spawn(async move {
            listener.fired().await;
        });

        shutdown.fire();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("Listener muss zurueckkehren")
            .unwrap();
    }

    #[tokio::test]
    async fn spaeter_listener_sieht_ausgeloesten_zustand() {
        let shutdown = Shutdown::new();
        shutdown.fire();
        let mut listener = shutdown.listener();
        assert!(listener.is_fired());
        tokio::time::timeout(Duration::from_millis(100), listener.fired())
            .await
            .expect("Bereits ausgeloestes Signal darf nicht blockieren");
    }

    #[tokio::test]
    async fn gedroppter_sender_beendet_listener() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();
        drop(shutdown);
        tokio::time::timeout(Duration::from_millis(100), listener.fired())
            .await
            .expect("Ohne Sender darf der Listener nicht ewig warten");
    }
}
