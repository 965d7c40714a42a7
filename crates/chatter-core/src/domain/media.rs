//! Media stream descriptors exchanged through the room.
//!
//! The stream itself is owned by the transport; the core only sees an opaque
//! handle plus the kind metadata that travels alongside it.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stream kind
// ---------------------------------------------------------------------------

/// What a published stream carries. Also the hook key for stream handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerStreamType {
    Audio,
    Video,
    Screen,
}

// ---------------------------------------------------------------------------
// Stream handle
// ---------------------------------------------------------------------------

/// Opaque handle to a local or remote media stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaStream {
    /// Transport-level stream identifier.
    pub id: String,
    pub kind: PeerStreamType,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, kind: PeerStreamType) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Hook keys
// ---------------------------------------------------------------------------

/// Purpose keys for peer join/leave handlers. One active handler per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerHookType {
    NewPeer,
    Audio,
    Video,
    Screen,
    FileShare,
}
