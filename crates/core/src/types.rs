//! Identifikationstypen der AudioBridge
//!
//! Newtype-Pattern, damit Quell-IDs und Session-IDs nicht mit
//! beliebigen Zahlen oder UUIDs verwechselt werden koennen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stabile Kennung eines Sprechers innerhalb einer Kanal-Session
///
/// Entspricht der SSRC des eingehenden Audio-Streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl SourceId {
    /// Gibt den rohen Zahlenwert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl From<u32> for SourceId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source:{}", self.0)
    }
}

/// Kennung einer Streaming-Session (ein Sink-Prozess pro Session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}
