//! audiobridge-audio – Audio-Schicht der AudioBridge
//!
//! - Opus Encoding/Decoding im kanonischen Format
//! - Auswahl des Capture-Geraets mit Fallback-Liste
//! - System-Audio-Capture via cpal in 20ms-Frames
//! - Uplink: Capture -> Opus -> ausgehende Queue im festen Takt

pub mod capture;
pub mod codec;
pub mod device;
pub mod error;
pub mod uplink;

// Bequeme Re-Exporte der wichtigsten Typen
pub use capture::{CaptureConfig, CaptureDevice, CaptureQueue, FrameAssembler};
pub use codec::{
    EncoderConfig, FrameDecoder, OpusApplication, OpusDecoder, OpusEncoder, MAX_PACKET_BYTES,
    OPUS_SILENCE_FRAME,
};
pub use device::{list_input_devices, resolve_input_device, select_input_device, AudioDevice};
pub use error::{AudioError, AudioResult};
pub use uplink::{Uplink, UplinkHandle, UplinkSnapshot, UplinkStats, PRIMING_FRAMES};
