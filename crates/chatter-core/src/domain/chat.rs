//! Chat session value types: transcript entries and roster peers.
//!
//! Pure data, no I/O. Field names follow the wire shape used by browser
//! peers (`authorId`, `timeSent`, `magnetURI`, ...).

use serde::{Deserialize, Serialize};

use super::identity::{ContentId, MessageId, PeerId};

// ---------------------------------------------------------------------------
// Transcript entries
// ---------------------------------------------------------------------------

/// A text chat message.
///
/// "Unsent" while `time_received` is `None`, "received" once it has been
/// acknowledged locally or arrived from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub author_id: String,
    pub text: String,
    pub time_sent: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_received: Option<u64>,
}

/// A message whose body is a reference to offered file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineMedia {
    pub id: MessageId,
    pub author_id: String,
    #[serde(rename = "magnetURI")]
    pub magnet_uri: ContentId,
    pub time_sent: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_received: Option<u64>,
}

/// One transcript slot. On the wire the two kinds are told apart by shape:
/// a `text` field or a `magnetURI` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranscriptEntry {
    Message(Message),
    InlineMedia(InlineMedia),
}

impl TranscriptEntry {
    pub fn id(&self) -> &MessageId {
        match self {
            Self::Message(m) => &m.id,
            Self::InlineMedia(m) => &m.id,
        }
    }

    pub fn time_received(&self) -> Option<u64> {
        match self {
            Self::Message(m) => m.time_received,
            Self::InlineMedia(m) => m.time_received,
        }
    }

    pub fn is_received(&self) -> bool {
        self.time_received().is_some()
    }

    /// Stamp the entry as received at `at`.
    pub fn mark_received(&mut self, at: u64) {
        match self {
            Self::Message(m) => m.time_received = Some(at),
            Self::InlineMedia(m) => m.time_received = Some(at),
        }
    }

    /// Content identifier if this entry is inline media.
    pub fn content_id(&self) -> Option<&ContentId> {
        match self {
            Self::Message(_) => None,
            Self::InlineMedia(m) => Some(&m.magnet_uri),
        }
    }
}

impl From<Message> for TranscriptEntry {
    fn from(m: Message) -> Self {
        Self::Message(m)
    }
}

impl From<InlineMedia> for TranscriptEntry {
    fn from(m: InlineMedia) -> Self {
        Self::InlineMedia(m)
    }
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioState {
    Playing,
    #[default]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoState {
    Playing,
    #[default]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScreenShareState {
    Sharing,
    #[default]
    NotSharing,
}

/// A remote participant as seen by the local session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub peer_id: PeerId,
    /// Stable display identifier asserted by the peer itself.
    pub user_id: String,
    pub audio_state: AudioState,
    pub video_state: VideoState,
    pub screen_share_state: ScreenShareState,
    pub offered_file_id: Option<ContentId>,
}

impl Peer {
    /// A freshly announced peer: nothing playing, nothing offered.
    pub fn new(peer_id: PeerId, user_id: String) -> Self {
        Self {
            peer_id,
            user_id,
            audio_state: AudioState::default(),
            video_state: VideoState::default(),
            screen_share_state: ScreenShareState::default(),
            offered_file_id: None,
        }
    }
}
