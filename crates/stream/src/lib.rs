//! audiobridge-stream – Egress der AudioBridge
//!
//! - [`sink`] – Externer Sink-Prozess (ffmpeg) mit Exit-Watcher
//! - [`session`] – Forward-Session: Egress-Queue -> Sink-Pipe

pub mod error;
pub mod session;
pub mod sink;

pub use error::{SinkError, SinkResult};
pub use session::{ForwardSession, SessionEnde};
pub use sink::{ffmpeg_args, SinkConfig, SinkProcess, STOP_GRACE};
