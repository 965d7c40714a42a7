//! Application-level action namespaces layered on the room.
//!
//! Each namespace is bound to exactly one payload type. Pure data, no I/O.

use super::chat::{InlineMedia, Message, TranscriptEntry};
use super::identity::ContentId;

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

/// Named action channels used by a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerAction {
    /// Unicast on join: the sender's display identifier.
    PeerName,
    /// Broadcast: one text message.
    Message,
    /// Broadcast: one inline media reference.
    MediaMessage,
    /// Unicast on join (public rooms only): received transcript entries.
    MessageTranscript,
    /// Broadcast: the sender's currently offered file, `None` once rescinded.
    FileOffer,
}

impl PeerAction {
    pub const ALL: [PeerAction; 5] = [
        Self::PeerName,
        Self::Message,
        Self::MediaMessage,
        Self::MessageTranscript,
        Self::FileOffer,
    ];

    /// Namespace string on the wire.
    pub fn namespace(self) -> &'static str {
        match self {
            Self::PeerName => "peer-name",
            Self::Message => "message",
            Self::MediaMessage => "media-message",
            Self::MessageTranscript => "message-transcript",
            Self::FileOffer => "file-offer",
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

pub type PeerNamePayload = String;

/// Sent without `time_received`; the receiver stamps its own.
pub type MessagePayload = Message;

pub type MediaMessagePayload = InlineMedia;

pub type TranscriptPayload = Vec<TranscriptEntry>;

pub type FileOfferPayload = Option<ContentId>;
