//! Room join options and messaging limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::identity::RoomId;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Messages must be strictly shorter than this many characters.
pub const DEFAULT_MESSAGE_CHARACTER_SIZE_LIMIT: usize = 10_000;

/// Number of transcript entries retained in memory.
pub const DEFAULT_MESSAGE_TRANSCRIPT_SIZE_LIMIT: usize = 150;

/// Spacing between two queued stream publications (ms).
pub const DEFAULT_STREAM_QUEUE_ADD_DELAY_MS: u64 = 1_000;

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Options recognised when joining a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Application namespace, passed through to the transport.
    pub app_id: String,
    /// Presence makes the room private.
    pub password: Option<String>,
    /// Relay/tracker endpoints, passed through unmodified.
    pub relay_urls: Vec<String>,
}

impl RoomConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn is_private(&self) -> bool {
        self.password.is_some()
    }

    /// Shared room secret: the password, or the room id itself for public rooms.
    pub fn secret(&self, room_id: &RoomId) -> String {
        self.password.clone().unwrap_or_else(|| room_id.0.clone())
    }
}

// ---------------------------------------------------------------------------
// MessagingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub message_character_size_limit: usize,
    pub message_transcript_size_limit: usize,
    pub stream_queue_add_delay_ms: u64,
}

impl MessagingConfig {
    pub fn stream_queue_add_delay(&self) -> Duration {
        Duration::from_millis(self.stream_queue_add_delay_ms)
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            message_character_size_limit: DEFAULT_MESSAGE_CHARACTER_SIZE_LIMIT,
            message_transcript_size_limit: DEFAULT_MESSAGE_TRANSCRIPT_SIZE_LIMIT,
            stream_queue_add_delay_ms: DEFAULT_STREAM_QUEUE_ADD_DELAY_MS,
        }
    }
}
