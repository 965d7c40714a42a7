//! Port traits (interfaces) that use cases depend on.
//!
//! Adapters implement these traits; use cases never reference a concrete
//! transport, file swarm or UI toolkit.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::config::RoomConfig;
use crate::domain::identity::{ContentId, MessageId, PeerId, RoomId};
use crate::domain::media::MediaStream;

// ---------------------------------------------------------------------------
// Room transport (peer discovery + action primitive)
// ---------------------------------------------------------------------------

/// Raw event delivered by the transport, fire-and-forget.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    PeerJoin(PeerId),
    PeerLeave(PeerId),
    PeerStream {
        peer_id: PeerId,
        stream: MediaStream,
    },
    Action {
        namespace: String,
        payload: Bytes,
        from: PeerId,
    },
}

/// A freshly joined room: the handle plus its ordered event stream.
pub struct JoinedRoom {
    pub transport: Arc<dyn RoomTransport>,
    pub events: mpsc::UnboundedReceiver<RoomEvent>,
}

/// Creates room handles. Rejecting the configuration is fatal for the caller.
pub trait RoomConnector: Send + Sync {
    fn join(&self, config: &RoomConfig, room_id: &RoomId) -> anyhow::Result<JoinedRoom>;
}

/// An open connection to a rendezvous room.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Our own transport-assigned id.
    fn self_id(&self) -> PeerId;

    /// Peers currently connected, as far as the transport knows.
    fn peers(&self) -> Vec<PeerId>;

    /// Send an action payload to one peer, or to everyone when `target` is `None`.
    async fn send(
        &self,
        namespace: &str,
        payload: Bytes,
        target: Option<&PeerId>,
    ) -> anyhow::Result<()>;

    /// Start sending a media stream. Resolves once every target has it.
    async fn add_stream(
        &self,
        stream: &MediaStream,
        targets: Option<&[PeerId]>,
    ) -> anyhow::Result<()>;

    /// Stop sending a media stream.
    fn remove_stream(&self, stream: &MediaStream, targets: Option<&[PeerId]>);

    /// Leave the room. Ends the event stream.
    fn leave(&self);
}

// ---------------------------------------------------------------------------
// File transfer
// ---------------------------------------------------------------------------

/// A named file blob, offered or downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub bytes: Bytes,
}

/// Receives download progress in `0.0..=1.0`.
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

#[derive(Clone, Default)]
pub struct DownloadOptions {
    pub save_to_disk: bool,
    pub on_progress: Option<ProgressCallback>,
}

/// Offers, serves and rescinds file blobs addressed by content id.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn offer(&self, files: Vec<FileUpload>, room_id: &RoomId) -> anyhow::Result<ContentId>;

    async fn download(
        &self,
        content_id: &ContentId,
        room_id: &RoomId,
        options: DownloadOptions,
    ) -> anyhow::Result<Vec<FileUpload>>;

    fn rescind(&self, content_id: &ContentId);

    fn is_offering(&self, content_id: &ContentId) -> bool;
}

// ---------------------------------------------------------------------------
// App events (UI bridge)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Success,
    Info,
    Warning,
    Error,
}

/// Emits events toward the UI layer.
#[async_trait]
pub trait AppEvents: Send + Sync {
    /// Transient, notification-level message.
    async fn emit_alert(&self, text: &str, severity: AlertSeverity);
    async fn play_new_message_sound(&self);
    /// System-level notification.
    async fn show_notification(&self, text: &str);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub play_sound_on_new_message: bool,
    pub show_notification_on_new_message: bool,
}

/// Read-only access to persisted user preferences.
pub trait SettingsSource: Send + Sync {
    fn user_settings(&self) -> UserSettings;
}

/// Renders a stable user id as a human-friendly name.
pub trait PeerNames: Send + Sync {
    fn display_name(&self, user_id: &str) -> String;
}

/// Produces globally unique message ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> MessageId;
}
