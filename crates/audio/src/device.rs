//! Audio-Geraete-Enumeration und -Auswahl
//!
//! Der Rueckkanal nimmt bevorzugt vom Monitor eines virtuellen Sinks auf.
//! Auswahlreihenfolge:
//! 1. Teilstring-Treffer auf den konfigurierten Geraetenamen
//! 2. Teilstring-Treffer auf die Fallback-Liste (in Prioritaetsreihenfolge)
//! 3. Erstes Eingabegeraet ueberhaupt
//!
//! Nur wenn kein Eingabegeraet existiert, schlaegt die Auswahl fehl.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use tracing::{debug, info, warn};

use crate::error::{AudioError, AudioResult};

/// Repraesentiert ein Eingabegeraet mit seinen Eigenschaften
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Anzeigename des Geraets
    pub name: String,
    /// Unterstuetzte Abtastraten
    pub sample_rates: Vec<u32>,
    /// Maximale Kanalanzahl
    pub channels: u16,
}

/// Waehlt aus einer Liste von Geraetenamen den Index des zu oeffnenden Geraets
pub fn select_input_device<S: AsRef<str>>(
    namen: &[S],
    bevorzugt: &str,
    fallbacks: &[String],
) -> Option<usize> {
    let finde = |muster: &str| {
        namen
            .iter()
            .position(|name| name.as_ref().contains(muster))
    };

    if !bevorzugt.is_empty() {
        if let Some(idx) = finde(bevorzugt) {
            return Some(idx);
        }
    }

    for fallback in fallbacks.iter().filter(|f| !f.is_empty()) {
        if let Some(idx) = finde(fallback) {
            return Some(idx);
        }
    }

    if namen.is_empty() {
        None
    } else {
        Some(0)
    }
}

/// Listet alle verfuegbaren Eingabegeraete auf
pub fn list_input_devices() -> AudioResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let mut result = Vec::new();
    for device in devices {
        match device_to_audio_device(&device) {
            Ok(ad) => result.push(ad),
            Err(e) => warn!("Eingabegeraet konnte nicht gelesen werden: {}", e),
        }
    }
    debug!("Gefundene Eingabegeraete: {}", result.len());
    Ok(result)
}

/// Laedt das cpal-Eingabegeraet nach der Auswahlreihenfolge
pub fn resolve_input_device(bevorzugt: &str, fallbacks: &[String]) -> AudioResult<(Device, String)> {
    let host = cpal::default_host();
    let mut kandidaten: Vec<(Device, String)> = host
        .input_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .filter_map(|d| d.name().ok().map(|name| (d, name)))
        .collect();

    let namen: Vec<&str> = kandidaten.iter().map(|(_, n)| n.as_str()).collect();
    let idx = select_input_device(&namen, bevorzugt, fallbacks)
        .ok_or_else(|| AudioError::GeraetNichtGefunden(bevorzugt.to_string()))?;

    let (device, name) = kandidaten.swap_remove(idx);
    if !name.contains(bevorzugt) {
        warn!(
            bevorzugt = %bevorzugt,
            gewaehlt = %name,
            "Bevorzugtes Capture-Geraet nicht gefunden, verwende Fallback"
        );
    } else {
        info!(geraet = %name, "Capture-Geraet gewaehlt");
    }
    Ok((device, name))
}

// Hilfsfunktion: cpal Device -> AudioDevice
fn device_to_audio_device(device: &Device) -> AudioResult<AudioDevice> {
    let name = device
        .name()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let mut sample_rates = Vec::new();
    let mut max_channels = 1u16;

    if let Ok(configs) = device.supported_input_configs() {
        for cfg in configs {
            let min = cfg.min_sample_rate().0;
            let max = cfg.max_sample_rate().0;
            // Gaengige Raten pruefen
            for rate in [16000u32, 44100, 48000] {
                if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                    sample_rates.push(rate);
                }
            }
            if cfg.channels() > max_channels {
                max_channels = cfg.channels();
            }
        }
    }

    sample_rates.sort_unstable();

    Ok(AudioDevice {
        name,
        sample_rates,
        channels: max_channels,
    })
}
