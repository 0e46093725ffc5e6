//! AudioBridge – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet die
//! Bridge. Laeuft bis Ctrl-C oder SIGTERM.
//!
//! `audiobridge --list-devices` listet die verfuegbaren Capture-Geraete.

use anyhow::{Context, Result};
use audiobridge_observability::logging_initialisieren;
use audiobridge_server::{
    config::{BridgeConfig, ConfigQuelle},
    Bridge,
};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().skip(1).any(|arg| arg == "--list-devices") {
        return geraete_auflisten();
    }

    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad =
        std::env::var("AUDIOBRIDGE_CONFIG").unwrap_or_else(|_| "audiobridge.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let (config, quelle) = BridgeConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format)?;

    if quelle == ConfigQuelle::Standardwerte {
        tracing::warn!(
            pfad = %config_pfad,
            "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
        );
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        ziel = %config.streaming.destination_url,
        "AudioBridge wird initialisiert"
    );

    let mut bridge = Bridge::start(config)
        .await
        .context("Bridge konnte nicht gestartet werden")?;

    tracing::info!("Bridge laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
    auf_signal_warten().await?;
    tracing::info!("Shutdown-Signal empfangen, Bridge wird beendet");

    bridge.stop().await;
    Ok(())
}

fn geraete_auflisten() -> Result<()> {
    let geraete = audiobridge_audio::list_input_devices()?;
    if geraete.is_empty() {
        println!("Keine Eingabegeraete gefunden");
    }
    for geraet in geraete {
        println!(
            "{} (Kanaele: {}, Raten: {:?})",
            geraet.name, geraet.channels, geraet.sample_rates
        );
    }
    Ok(())
}

#[cfg(unix)]
async fn auf_signal_warten() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        ergebnis = tokio::signal::ctrl_c() => ergebnis?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn auf_signal_warten() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
