//! audiobridge-core – Gemeinsame Typen und Primitive
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! AudioBridge-Crates gemeinsam genutzt werden: das kanonische PCM-Format,
//! Quell-IDs, das geteilte Shutdown-Signal und den zentralen Fehlertyp.

pub mod error;
pub mod frame;
pub mod shutdown;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{BridgeError, Result};
pub use frame::{
    PcmFrame, CHANNELS, FRAME_BYTES, FRAME_SAMPLES, FRAME_SAMPLES_PER_CHANNEL, SAMPLE_RATE, TICK,
};
pub use shutdown::{Shutdown, ShutdownListener};
pub use types::{SessionId, SourceId};
