//! audiobridge-voice – Eingangsseite und Mixer der AudioBridge
//!
//! ## Module
//! - [`jitter_buffer`] – Begrenzte Jitter Queue pro Quelle
//! - [`registry`] – Geteilte Registry aller Quell-Queues (ein Lock)
//! - [`decoder`] – Decoder pro Quelle, Ingest-Pfad
//! - [`mixer`] – Mixer im festen 20ms-Takt

pub mod decoder;
pub mod jitter_buffer;
pub mod mixer;
pub mod registry;

pub use decoder::{DecoderFactory, DecoderRegistry, DecoderStatistik, IngestOutcome};
pub use jitter_buffer::{JitterQueue, DEFAULT_JITTER_DEPTH};
pub use mixer::{
    clamp_sample, mix_frames, MixerConfig, MixerHandle, MixerSnapshot, MixerState, MixerStats,
    MixingEngine, DEFAULT_EGRESS_DEPTH,
};
pub use registry::{SourceQueues, SOURCE_IDLE_TIMEOUT};
