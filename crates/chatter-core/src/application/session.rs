//! SessionOrchestrator — the chat session state machine.
//!
//! Owns the roster, the bounded transcript and the send/unread flags. Gateway
//! hooks and action receivers only forward into one ordered channel; a single
//! task drains it and reconciles state, always re-reading current state at
//! handling time.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::action::{
    FileOfferPayload, MediaMessagePayload, MessagePayload, PeerAction, PeerNamePayload,
    TranscriptPayload,
};
use crate::domain::chat::{
    AudioState, InlineMedia, Message, Peer, ScreenShareState, TranscriptEntry, VideoState,
};
use crate::domain::config::MessagingConfig;
use crate::domain::error::SessionError;
use crate::domain::identity::{now_millis, ContentId, MessageId, PeerId, RoomId};
use crate::domain::media::{MediaStream, PeerHookType, PeerStreamType};

use super::action_channel::ActionChannel;
use super::peer_room::PeerRoomGateway;
use super::ports::{
    AlertSeverity, AppEvents, DownloadOptions, FileTransfer, FileUpload, IdGenerator, PeerNames,
    ProgressCallback, SettingsSource,
};
use super::roster::Roster;
use super::transcript::Transcript;

/// Longest text shown in a new-message notification.
const NOTIFICATION_PREVIEW_CHARS: usize = 100;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Everything that can re-enter the session from the room.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    PeerStream { peer_id: PeerId, stream: MediaStream },
    PeerName { peer_id: PeerId, user_id: String },
    Message { from: PeerId, message: Message },
    InlineMedia { from: PeerId, media: InlineMedia },
    Transcript { from: PeerId, entries: Vec<TranscriptEntry> },
    FileOffer { from: PeerId, content_id: Option<ContentId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Broadcast and acknowledged.
    Sent(MessageId),
    /// Another send was in flight; nothing happened.
    Busy,
}

/// External collaborators the session calls out to.
#[derive(Clone)]
pub struct SessionPorts {
    pub file_transfer: Arc<dyn FileTransfer>,
    pub app_events: Arc<dyn AppEvents>,
    pub settings: Arc<dyn SettingsSource>,
    pub names: Arc<dyn PeerNames>,
    pub ids: Arc<dyn IdGenerator>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct SessionChannels {
    peer_name: ActionChannel<PeerNamePayload>,
    message: ActionChannel<MessagePayload>,
    media_message: ActionChannel<MediaMessagePayload>,
    transcript: ActionChannel<TranscriptPayload>,
    file_offer: ActionChannel<FileOfferPayload>,
}

impl SessionChannels {
    fn bind(gateway: &Arc<PeerRoomGateway>) -> Self {
        Self {
            peer_name: gateway.make_action(PeerAction::PeerName.namespace()),
            message: gateway.make_action(PeerAction::Message.namespace()),
            media_message: gateway.make_action(PeerAction::MediaMessage.namespace()),
            transcript: gateway.make_action(PeerAction::MessageTranscript.namespace()),
            file_offer: gateway.make_action(PeerAction::FileOffer.namespace()),
        }
    }
}

struct SessionState {
    roster: Roster,
    transcript: Transcript,
    /// Includes the local peer.
    number_of_peers: usize,
    unread_messages: usize,
    is_message_sending: bool,
    is_showing_messages: bool,
    tab_has_focus: bool,
    offered_file_id: Option<ContentId>,
    closed: bool,
}

/// What a received entry should trigger once the state lock is released.
struct ReceiptEffects {
    evicted: Vec<TranscriptEntry>,
    notify: bool,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct SessionOrchestrator {
    gateway: Arc<PeerRoomGateway>,
    user_id: String,
    config: MessagingConfig,
    file_transfer: Arc<dyn FileTransfer>,
    app_events: Arc<dyn AppEvents>,
    settings: Arc<dyn SettingsSource>,
    names: Arc<dyn PeerNames>,
    ids: Arc<dyn IdGenerator>,
    channels: SessionChannels,
    state: Mutex<SessionState>,
}

impl SessionOrchestrator {
    /// Register against the gateway's hooks and action channels, start the
    /// reconciliation task and begin dispatching room events.
    pub fn spawn(
        gateway: Arc<PeerRoomGateway>,
        user_id: impl Into<String>,
        config: MessagingConfig,
        ports: SessionPorts,
    ) -> Arc<Self> {
        let channels = SessionChannels::bind(&gateway);
        let transcript = Transcript::new(config.message_transcript_size_limit);

        let session = Arc::new(Self {
            gateway: Arc::clone(&gateway),
            user_id: user_id.into(),
            config,
            file_transfer: ports.file_transfer,
            app_events: ports.app_events,
            settings: ports.settings,
            names: ports.names,
            ids: ports.ids,
            channels,
            state: Mutex::new(SessionState {
                roster: Roster::new(),
                transcript,
                number_of_peers: 1,
                unread_messages: 0,
                is_message_sending: false,
                is_showing_messages: true,
                tab_has_focus: true,
                offered_file_id: None,
                closed: false,
            }),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        session.register(tx);
        tokio::spawn(Self::run(Arc::downgrade(&session), rx));
        gateway.start();

        info!(room_id = %gateway.room_id(), user_id = %session.user_id, "Session started");
        session
    }

    fn register(&self, tx: mpsc::UnboundedSender<SessionEvent>) {
        let gateway = &self.gateway;

        let events = tx.clone();
        gateway.on_peer_join(PeerHookType::NewPeer, move |peer_id| {
            let _ = events.send(SessionEvent::PeerJoined(peer_id.clone()));
        });

        let events = tx.clone();
        gateway.on_peer_leave(PeerHookType::NewPeer, move |peer_id| {
            let _ = events.send(SessionEvent::PeerLeft(peer_id.clone()));
        });

        for kind in [PeerStreamType::Audio, PeerStreamType::Video, PeerStreamType::Screen] {
            let events = tx.clone();
            gateway.on_peer_stream(kind, move |peer_id, stream| {
                if stream.kind == kind {
                    let _ = events.send(SessionEvent::PeerStream {
                        peer_id: peer_id.clone(),
                        stream: stream.clone(),
                    });
                }
            });
        }

        let events = tx.clone();
        self.channels.peer_name.on_receive(move |user_id, from| {
            let _ = events.send(SessionEvent::PeerName {
                peer_id: from.clone(),
                user_id,
            });
        });

        let events = tx.clone();
        self.channels.message.on_receive(move |message, from| {
            let _ = events.send(SessionEvent::Message {
                from: from.clone(),
                message,
            });
        });

        let events = tx.clone();
        self.channels.media_message.on_receive(move |media, from| {
            let _ = events.send(SessionEvent::InlineMedia {
                from: from.clone(),
                media,
            });
        });

        let events = tx.clone();
        self.channels.transcript.on_receive(move |entries, from| {
            let _ = events.send(SessionEvent::Transcript {
                from: from.clone(),
                entries,
            });
        });

        let events = tx;
        self.channels.file_offer.on_receive(move |content_id, from| {
            let _ = events.send(SessionEvent::FileOffer {
                from: from.clone(),
                content_id,
            });
        });
    }

    /// Drain inbound events until the gateway drops its handlers.
    async fn run(session: Weak<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            session.handle(event).await;
        }
        debug!("Session event loop exited");
    }

    /// Reconcile one inbound event. Events still queued after `leave` are
    /// dropped.
    pub async fn handle(self: &Arc<Self>, event: SessionEvent) {
        if self.is_closed() {
            debug!(?event, "Dropping event after leaving room");
            return;
        }
        match event {
            SessionEvent::PeerJoined(peer_id) => self.on_peer_joined(peer_id).await,
            SessionEvent::PeerLeft(peer_id) => self.on_peer_left(peer_id).await,
            SessionEvent::PeerStream { peer_id, stream } => self.on_peer_stream(&peer_id, &stream),
            SessionEvent::PeerName { peer_id, user_id } => self.on_peer_name(&peer_id, &user_id),
            SessionEvent::Message { from, message } => self.on_message(from, message).await,
            SessionEvent::InlineMedia { from, media } => self.on_inline_media(from, media).await,
            SessionEvent::Transcript { from, entries } => self.on_transcript(&from, entries),
            SessionEvent::FileOffer { from, content_id } => self.on_file_offer(&from, content_id),
        }
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    async fn on_peer_joined(self: &Arc<Self>, peer_id: PeerId) {
        self.app_events
            .emit_alert("Someone has joined the room", AlertSeverity::Success)
            .await;

        let (replay, offered) = {
            let mut state = self.state.lock().unwrap();
            state.number_of_peers += 1;
            let replay = (!self.gateway.is_private()).then(|| state.transcript.received());
            (replay, state.offered_file_id.clone())
        };
        info!(%peer_id, replay = ?replay.as_ref().map(Vec::len), "Peer joined, sending handshake");

        // The handshake must not hold up reconciliation of later events.
        let session = Arc::clone(self);
        tokio::spawn(async move { session.handshake(peer_id, replay, offered).await });
    }

    /// Announce ourselves to a newcomer and, in public rooms, catch them up.
    /// Failures are logged only.
    async fn handshake(
        &self,
        peer_id: PeerId,
        replay: Option<Vec<TranscriptEntry>>,
        offered: Option<ContentId>,
    ) {
        let name = self.channels.peer_name.send(&self.user_id, Some(&peer_id));
        let transcript = async {
            match &replay {
                Some(entries) => self.channels.transcript.send(entries, Some(&peer_id)).await,
                None => Ok(()),
            }
        };
        let file_offer = async {
            match &offered {
                Some(content_id) => {
                    self.channels
                        .file_offer
                        .send(&Some(content_id.clone()), Some(&peer_id))
                        .await
                }
                None => Ok(()),
            }
        };

        let (name, transcript, file_offer) = tokio::join!(name, transcript, file_offer);
        for (what, result) in [
            ("peer name", name),
            ("message transcript", transcript),
            ("file offer", file_offer),
        ] {
            if let Err(e) = result {
                warn!(%peer_id, "Failed to send {what} to new peer: {e}");
            }
        }
    }

    async fn on_peer_left(&self, peer_id: PeerId) {
        let name = {
            let state = self.state.lock().unwrap();
            state
                .roster
                .get(&peer_id)
                .map(|peer| self.names.display_name(&peer.user_id))
        };
        let name = name.unwrap_or_else(|| "Someone".to_owned());
        self.app_events
            .emit_alert(&format!("{name} has left the room"), AlertSeverity::Warning)
            .await;

        let mut state = self.state.lock().unwrap();
        state.number_of_peers = state.number_of_peers.saturating_sub(1).max(1);
        if state.roster.remove(&peer_id).is_some() {
            info!(%peer_id, "Removed peer from roster");
        }
    }

    fn on_peer_name(&self, peer_id: &PeerId, user_id: &str) {
        let inserted = self.state.lock().unwrap().roster.upsert_name(peer_id, user_id);
        debug!(%peer_id, user_id, inserted, "Peer name");
    }

    fn on_peer_stream(&self, peer_id: &PeerId, stream: &MediaStream) {
        let updated = self.state.lock().unwrap().roster.update(peer_id, |peer| match stream.kind {
            PeerStreamType::Audio => peer.audio_state = AudioState::Playing,
            PeerStreamType::Video => peer.video_state = VideoState::Playing,
            PeerStreamType::Screen => peer.screen_share_state = ScreenShareState::Sharing,
        });
        if !updated {
            debug!(%peer_id, stream_id = %stream.id, "Stream from peer not in roster");
        }
    }

    fn on_file_offer(&self, peer_id: &PeerId, content_id: Option<ContentId>) {
        let mut state = self.state.lock().unwrap();
        let offered = content_id.clone();
        if !state
            .roster
            .update(peer_id, |peer| peer.offered_file_id = offered)
        {
            let mut peer = Peer::new(peer_id.clone(), peer_id.0.clone());
            peer.offered_file_id = content_id;
            state.roster.insert(peer);
        }
    }

    fn on_transcript(&self, from: &PeerId, entries: Vec<TranscriptEntry>) {
        let evicted = {
            let mut state = self.state.lock().unwrap();
            if !state.transcript.is_empty() {
                debug!(%from, "Ignoring transcript replay, local transcript already populated");
                return;
            }
            let received: Vec<_> = entries.into_iter().filter(|e| e.is_received()).collect();
            info!(%from, entries = received.len(), "Applying transcript replay");
            state.transcript.replace(received)
        };
        self.release_evicted(evicted);
    }

    async fn on_message(&self, from: PeerId, mut message: Message) {
        message.time_received = Some(now_millis());
        let preview: String = message.text.chars().take(NOTIFICATION_PREVIEW_CHARS).collect();
        let notification = format!("{}: {preview}", self.names.display_name(&message.author_id));
        debug!(%from, id = %message.id, "Received message");
        self.receive_entry(message.into(), notification).await;
    }

    async fn on_inline_media(&self, from: PeerId, mut media: InlineMedia) {
        media.time_received = Some(now_millis());
        let notification = format!("{} shared media", self.names.display_name(&media.author_id));
        debug!(%from, id = %media.id, "Received inline media");
        self.receive_entry(media.into(), notification).await;
    }

    async fn receive_entry(&self, entry: TranscriptEntry, notification: String) {
        let effects = {
            let mut state = self.state.lock().unwrap();
            let evicted = state.transcript.push(entry);
            if !state.is_showing_messages {
                state.unread_messages += 1;
            }
            ReceiptEffects {
                evicted,
                notify: !state.tab_has_focus || !state.is_showing_messages,
            }
        };
        self.release_evicted(effects.evicted);

        if effects.notify {
            let settings = self.settings.user_settings();
            if settings.play_sound_on_new_message {
                self.app_events.play_new_message_sound().await;
            }
            if settings.show_notification_on_new_message {
                self.app_events.show_notification(&notification).await;
            }
        }
    }

    /// Stop advertising content whose transcript entry just fell out of the
    /// window. Every transcript mutation funnels its evictions through here.
    /// Content that is also our standing file offer keeps being seeded.
    fn release_evicted(&self, evicted: Vec<TranscriptEntry>) {
        if evicted.is_empty() {
            return;
        }
        let offered = self.state.lock().unwrap().offered_file_id.clone();
        for entry in evicted {
            if let Some(content_id) = entry.content_id() {
                if offered.as_ref() == Some(content_id) {
                    debug!(%content_id, "Evicted media is the standing file offer, keeping it");
                } else if self.file_transfer.is_offering(content_id) {
                    info!(%content_id, "Rescinding offer for evicted inline media");
                    self.file_transfer.rescind(content_id);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Broadcast a text message. At most one send is in flight; a call made
    /// while another is pending returns [`SendOutcome::Busy`] and changes
    /// nothing.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome, SessionError> {
        self.validate(text)?;
        if !self.try_begin_send()? {
            return Ok(SendOutcome::Busy);
        }

        let message = Message {
            id: self.ids.next_id(),
            author_id: self.user_id.clone(),
            text: text.to_owned(),
            time_sent: now_millis(),
            time_received: None,
        };
        self.append_local(message.clone().into());

        let result = self.channels.message.send(&message, None).await;
        self.finish_send(&message.id, result)
    }

    /// Offer `files` and broadcast an inline media message referencing them.
    pub async fn upload_inline_media(
        &self,
        files: Vec<FileUpload>,
    ) -> Result<SendOutcome, SessionError> {
        if !self.try_begin_send()? {
            return Ok(SendOutcome::Busy);
        }

        let content_id = match self.file_transfer.offer(files, self.gateway.room_id()).await {
            Ok(content_id) => content_id,
            Err(e) => {
                self.state.lock().unwrap().is_message_sending = false;
                return Err(SessionError::FileTransfer(e));
            }
        };

        let media = InlineMedia {
            id: self.ids.next_id(),
            author_id: self.user_id.clone(),
            magnet_uri: content_id,
            time_sent: now_millis(),
            time_received: None,
        };
        self.append_local(media.clone().into());

        let result = self.channels.media_message.send(&media, None).await;
        self.finish_send(&media.id, result)
    }

    fn validate(&self, text: &str) -> Result<(), SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let len = text.chars().count();
        let limit = self.config.message_character_size_limit;
        if len >= limit {
            return Err(SessionError::MessageTooLong { len, limit });
        }
        Ok(())
    }

    fn try_begin_send(&self) -> Result<bool, SessionError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(SessionError::RoomClosed);
        }
        if state.is_message_sending {
            debug!("Send already in flight, ignoring");
            return Ok(false);
        }
        state.is_message_sending = true;
        Ok(true)
    }

    /// Optimistically show our own entry before the broadcast completes.
    fn append_local(&self, entry: TranscriptEntry) {
        let evicted = self.state.lock().unwrap().transcript.push(entry);
        self.release_evicted(evicted);
    }

    fn finish_send(
        &self,
        id: &MessageId,
        result: anyhow::Result<()>,
    ) -> Result<SendOutcome, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.is_message_sending = false;

        if let Err(e) = result {
            warn!(%id, "Broadcast failed: {e}");
            return Err(SessionError::Transport(e));
        }
        if state.closed {
            debug!(%id, "Acknowledgement after leaving room, ignoring");
        } else if !state.transcript.mark_received(id, now_millis()) {
            debug!(%id, "Acknowledged entry already evicted");
        }
        Ok(SendOutcome::Sent(id.clone()))
    }

    // -----------------------------------------------------------------------
    // File offers
    // -----------------------------------------------------------------------

    /// Offer `files` to the room as this peer's shared file, replacing any
    /// previous offer.
    pub async fn offer_file(&self, files: Vec<FileUpload>) -> Result<ContentId, SessionError> {
        if self.is_closed() {
            return Err(SessionError::RoomClosed);
        }
        let content_id = self
            .file_transfer
            .offer(files, self.gateway.room_id())
            .await
            .map_err(SessionError::FileTransfer)?;

        let previous = self
            .state
            .lock()
            .unwrap()
            .offered_file_id
            .replace(content_id.clone());
        if let Some(previous) = previous.filter(|previous| previous != &content_id) {
            self.file_transfer.rescind(&previous);
        }

        self.channels
            .file_offer
            .send(&Some(content_id.clone()), None)
            .await
            .map_err(SessionError::Transport)?;
        info!(%content_id, "Offering file to room");
        Ok(content_id)
    }

    pub async fn rescind_file_offer(&self) -> Result<(), SessionError> {
        let Some(content_id) = self.state.lock().unwrap().offered_file_id.take() else {
            return Ok(());
        };
        self.file_transfer.rescind(&content_id);
        info!(%content_id, "Rescinded file offer");
        self.channels
            .file_offer
            .send(&None, None)
            .await
            .map_err(SessionError::Transport)
    }

    /// Download the file `peer_id` is offering and save it.
    pub async fn download_peer_file(
        &self,
        peer_id: &PeerId,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<FileUpload>, SessionError> {
        let content_id = self
            .state
            .lock()
            .unwrap()
            .roster
            .get(peer_id)
            .and_then(|peer| peer.offered_file_id.clone())
            .ok_or_else(|| SessionError::NoOfferedFile(peer_id.clone()))?;

        self.download(
            &content_id,
            DownloadOptions {
                save_to_disk: true,
                on_progress,
            },
        )
        .await
    }

    /// Fetch the content behind an inline media entry for display.
    pub async fn download_inline_media(
        &self,
        content_id: &ContentId,
    ) -> Result<Vec<FileUpload>, SessionError> {
        self.download(content_id, DownloadOptions::default()).await
    }

    async fn download(
        &self,
        content_id: &ContentId,
        options: DownloadOptions,
    ) -> Result<Vec<FileUpload>, SessionError> {
        match self
            .file_transfer
            .download(content_id, self.gateway.room_id(), options)
            .await
        {
            Ok(files) => Ok(files),
            Err(e) => {
                warn!(%content_id, "Download failed: {e}");
                self.app_events
                    .emit_alert(&e.to_string(), AlertSeverity::Error)
                    .await;
                Err(SessionError::FileTransfer(e))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Leave the room. In-flight sends complete without touching state.
    pub fn leave(&self) {
        let offered = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            state.offered_file_id.take()
        };
        if let Some(content_id) = offered {
            self.file_transfer.rescind(&content_id);
        }
        self.gateway.close();
    }

    // -----------------------------------------------------------------------
    // UI state
    // -----------------------------------------------------------------------

    /// Whether the transcript panel is visible. Showing it clears unread.
    pub fn set_showing_messages(&self, showing: bool) {
        let mut state = self.state.lock().unwrap();
        state.is_showing_messages = showing;
        if showing {
            state.unread_messages = 0;
        }
    }

    pub fn set_tab_focus(&self, focused: bool) {
        self.state.lock().unwrap().tab_has_focus = focused;
    }

    // -----------------------------------------------------------------------
    // Accessors (snapshots)
    // -----------------------------------------------------------------------

    pub fn gateway(&self) -> &Arc<PeerRoomGateway> {
        &self.gateway
    }

    pub fn room_id(&self) -> &RoomId {
        self.gateway.room_id()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_private(&self) -> bool {
        self.gateway.is_private()
    }

    pub fn roster(&self) -> Vec<Peer> {
        self.state.lock().unwrap().roster.peers()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.state.lock().unwrap().transcript.entries()
    }

    pub fn number_of_peers(&self) -> usize {
        self.state.lock().unwrap().number_of_peers
    }

    pub fn unread_messages(&self) -> usize {
        self.state.lock().unwrap().unread_messages
    }

    pub fn is_message_sending(&self) -> bool {
        self.state.lock().unwrap().is_message_sending
    }

    pub fn offered_file_id(&self) -> Option<ContentId> {
        self.state.lock().unwrap().offered_file_id.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde::Serialize;

    use super::*;
    use crate::adapters::file_swarm::InMemoryFileSwarm;
    use crate::adapters::loopback::LoopbackNetwork;
    use crate::application::codec::CborCodec;
    use crate::application::ports::{RoomEvent, UserSettings};
    use crate::application::test_support::{
        settle, FixedSettings, RecordingAppEvents, RecordingConnector, RecordingFileTransfer,
        SequentialIds, UiEvent, UpperCaseNames,
    };
    use crate::domain::config::RoomConfig;

    struct Harness {
        connector: RecordingConnector,
        files: Arc<RecordingFileTransfer>,
        ui: Arc<RecordingAppEvents>,
        session: Arc<SessionOrchestrator>,
    }

    impl Harness {
        fn emit<T: Serialize>(&self, action: PeerAction, payload: &T, from: &str) {
            self.connector.emit(RoomEvent::Action {
                namespace: action.namespace().to_owned(),
                payload: CborCodec::encode(payload).unwrap(),
                from: PeerId::from(from),
            });
        }

        fn join(&self, peer: &str) {
            self.connector.emit(RoomEvent::PeerJoin(PeerId::from(peer)));
        }

        fn leave(&self, peer: &str) {
            self.connector.emit(RoomEvent::PeerLeave(PeerId::from(peer)));
        }

        fn ids(&self) -> Vec<String> {
            self.session
                .transcript()
                .iter()
                .map(|e| e.id().0.clone())
                .collect()
        }
    }

    fn harness_with(room: RoomConfig, limit: usize, settings: UserSettings) -> Harness {
        let connector = RecordingConnector::new();
        let gateway = PeerRoomGateway::open(
            &connector,
            &room,
            RoomId::from("lobby"),
            std::time::Duration::from_millis(1_000),
        )
        .unwrap();
        let files = Arc::new(RecordingFileTransfer::default());
        let ui = Arc::new(RecordingAppEvents::default());
        let config = MessagingConfig {
            message_transcript_size_limit: limit,
            ..MessagingConfig::default()
        };
        let session = SessionOrchestrator::spawn(
            gateway,
            "alice",
            config,
            SessionPorts {
                file_transfer: files.clone(),
                app_events: ui.clone(),
                settings: Arc::new(FixedSettings(settings)),
                names: Arc::new(UpperCaseNames),
                ids: Arc::new(SequentialIds::default()),
            },
        );
        Harness {
            connector,
            files,
            ui,
            session,
        }
    }

    fn harness(limit: usize) -> Harness {
        harness_with(RoomConfig::new("chatter-test"), limit, UserSettings::default())
    }

    fn remote_message(id: &str, author: &str, text: &str) -> Message {
        Message {
            id: MessageId::from(id),
            author_id: author.into(),
            text: text.into(),
            time_sent: 1,
            time_received: None,
        }
    }

    fn upload(name: &str) -> Vec<FileUpload> {
        vec![FileUpload {
            name: name.into(),
            bytes: Bytes::from_static(b"png"),
        }]
    }

    // -- Sending --

    #[tokio::test(start_paused = true)]
    async fn sixty_sends_keep_the_last_fifty() {
        let h = harness(50);
        for n in 1..=60 {
            let outcome = h.session.send_message(&format!("hello {n}")).await.unwrap();
            assert_eq!(outcome, SendOutcome::Sent(MessageId(format!("msg-{n}"))));
            assert!(h.session.transcript().len() <= 50);
        }

        let expected: Vec<_> = (11..=60).map(|n| format!("msg-{n}")).collect();
        assert_eq!(h.ids(), expected);
        assert!(h.session.transcript().iter().all(TranscriptEntry::is_received));
        assert_eq!(h.connector.transport().sent_on("message").len(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_in_flight_is_a_noop() {
        let h = harness(50);
        let transport = h.connector.transport();
        transport.hold_sends();

        let session = h.session.clone();
        let first = tokio::spawn(async move { session.send_message("first").await });
        settle().await;

        assert!(h.session.is_message_sending());
        let transcript = h.session.transcript();
        assert_eq!(transcript.len(), 1);
        assert!(!transcript[0].is_received());

        let second = h.session.send_message("second").await.unwrap();
        assert_eq!(second, SendOutcome::Busy);
        assert_eq!(h.session.transcript().len(), 1);

        transport.release_sends(1);
        let first = first.await.unwrap().unwrap();
        assert_eq!(first, SendOutcome::Sent(MessageId::from("msg-1")));
        assert!(!h.session.is_message_sending());
        assert_eq!(h.ids(), vec!["msg-1"]);
        assert!(h.session.transcript()[0].is_received());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_messages_are_rejected() {
        let h = harness(50);
        assert!(matches!(
            h.session.send_message("   ").await,
            Err(SessionError::EmptyMessage)
        ));

        let too_long = "x".repeat(MessagingConfig::default().message_character_size_limit);
        assert!(matches!(
            h.session.send_message(&too_long).await,
            Err(SessionError::MessageTooLong { .. })
        ));
        assert!(h.session.transcript().is_empty());
        assert!(h.connector.transport().sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_broadcast_clears_flag_and_leaves_entry_unsent() {
        let h = harness(50);
        h.connector.transport().fail_namespace("message");

        let result = h.session.send_message("hello").await;

        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert!(!h.session.is_message_sending());
        assert!(!h.session.transcript()[0].is_received());
    }

    #[tokio::test(start_paused = true)]
    async fn late_acknowledgement_after_leave_is_ignored() {
        let h = harness(50);
        let transport = h.connector.transport();
        transport.hold_sends();

        let session = h.session.clone();
        let pending = tokio::spawn(async move { session.send_message("bye").await });
        settle().await;

        h.session.leave();
        transport.release_sends(1);
        pending.await.unwrap().unwrap();

        assert!(!h.session.transcript()[0].is_received());
        assert!(matches!(
            h.session.send_message("again").await,
            Err(SessionError::RoomClosed)
        ));
        assert_eq!(transport.leave_calls(), 1);
    }

    // -- Eviction --

    #[tokio::test(start_paused = true)]
    async fn evicted_inline_media_is_rescinded_once() {
        let h = harness(2);
        h.session.upload_inline_media(upload("cat.png")).await.unwrap();
        let content_id = h.session.transcript()[0].content_id().cloned().unwrap();

        h.session.send_message("one").await.unwrap();
        assert!(h.files.rescinded().is_empty());

        h.session.send_message("two").await.unwrap();
        assert_eq!(h.files.rescinded(), vec![content_id.clone()]);

        h.session.send_message("three").await.unwrap();
        assert_eq!(h.files.rescinded(), vec![content_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn evicting_messages_or_stale_media_never_rescinds() {
        let h = harness(1);
        h.session.upload_inline_media(upload("cat.png")).await.unwrap();
        let content_id = h.session.transcript()[0].content_id().cloned().unwrap();
        h.files.stop_offering(&content_id);

        h.session.send_message("one").await.unwrap();
        h.session.send_message("two").await.unwrap();

        assert!(h.files.rescinded().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_media_matching_standing_offer_stays_seeded() {
        let h = harness(1);
        let offered = h.session.offer_file(upload("cat.png")).await.unwrap();
        h.session.upload_inline_media(upload("cat.png")).await.unwrap();
        assert_eq!(h.session.transcript()[0].content_id(), Some(&offered));

        h.session.send_message("next").await.unwrap();

        assert_eq!(h.ids(), vec!["msg-2"]);
        assert!(h.files.rescinded().is_empty());
        assert!(h.files.is_offering(&offered));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_replay_rescinds_evicted_offered_media_once() {
        let h = harness(1);
        let content_id = h
            .files
            .offer(upload("cat.png"), &RoomId::from("lobby"))
            .await
            .unwrap();
        let media = TranscriptEntry::InlineMedia(InlineMedia {
            id: MessageId::from("r1"),
            author_id: "alice".into(),
            magnet_uri: content_id.clone(),
            time_sent: 1,
            time_received: Some(2),
        });
        let mut text = remote_message("r2", "bob", "later");
        text.time_received = Some(3);

        h.emit(
            PeerAction::MessageTranscript,
            &vec![media, TranscriptEntry::Message(text)],
            "p2",
        );
        settle().await;

        assert_eq!(h.ids(), vec!["r2"]);
        assert_eq!(h.files.rescinded(), vec![content_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_traffic_evicts_our_media() {
        let h = harness(1);
        h.session.upload_inline_media(upload("cat.png")).await.unwrap();
        let content_id = h.session.transcript()[0].content_id().cloned().unwrap();

        h.emit(PeerAction::Message, &remote_message("r1", "bob", "hi"), "p2");
        settle().await;

        assert_eq!(h.ids(), vec!["r1"]);
        assert_eq!(h.files.rescinded(), vec![content_id]);
    }

    // -- Joins --

    #[tokio::test(start_paused = true)]
    async fn public_join_replays_received_transcript() {
        let h = harness(50);
        for n in 1..=5 {
            h.emit(
                PeerAction::Message,
                &remote_message(&format!("r{n}"), "bob", &format!("m{n}")),
                "p9",
            );
        }
        settle().await;
        let existing = h.session.transcript();
        assert_eq!(existing.len(), 5);

        h.join("p2");
        settle().await;

        let transport = h.connector.transport();
        let names = transport.sent_on("peer-name");
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].target, Some(PeerId::from("p2")));
        assert_eq!(names[0].decode::<String>(), "alice");

        let replays = transport.sent_on("message-transcript");
        assert_eq!(replays.len(), 1);
        assert_eq!(replays[0].target, Some(PeerId::from("p2")));
        assert_eq!(replays[0].decode::<Vec<TranscriptEntry>>(), existing);

        assert_eq!(h.session.number_of_peers(), 2);
        assert_eq!(
            h.ui.events(),
            vec![UiEvent::Alert(
                "Someone has joined the room".into(),
                AlertSeverity::Success
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn replay_excludes_unacknowledged_entries() {
        let h = harness(50);
        h.emit(PeerAction::Message, &remote_message("r1", "bob", "hi"), "p9");
        settle().await;

        let transport = h.connector.transport();
        transport.hold_sends();
        let session = h.session.clone();
        let _pending = tokio::spawn(async move { session.send_message("mine").await });
        settle().await;
        assert_eq!(h.session.transcript().len(), 2);

        h.join("p2");
        settle().await;

        let replays = transport.sent_on("message-transcript");
        let replayed = replays[0].decode::<Vec<TranscriptEntry>>();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id(), &MessageId::from("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn private_join_sends_no_transcript() {
        let h = harness_with(
            RoomConfig::new("chatter-test").with_password("secret"),
            50,
            UserSettings::default(),
        );
        h.session.send_message("hello").await.unwrap();

        h.join("p2");
        settle().await;

        let transport = h.connector.transport();
        assert_eq!(transport.sent_on("peer-name").len(), 1);
        assert!(transport.sent_on("message-transcript").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handshake_keeps_join_state() {
        let h = harness(50);
        h.connector.transport().fail_namespace("peer-name");

        h.join("p2");
        settle().await;

        assert_eq!(h.session.number_of_peers(), 2);
        assert_eq!(h.connector.transport().sent_on("message-transcript").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn join_shares_current_file_offer() {
        let h = harness(50);
        let content_id = h.session.offer_file(upload("notes.txt")).await.unwrap();

        h.join("p2");
        settle().await;

        let offers = h.connector.transport().sent_on("file-offer");
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].target, None);
        assert_eq!(offers[1].target, Some(PeerId::from("p2")));
        assert_eq!(offers[1].decode::<Option<ContentId>>(), Some(content_id));
    }

    // -- Replay receipt --

    #[tokio::test(start_paused = true)]
    async fn replay_applies_only_to_empty_transcript() {
        let h = harness(50);
        let mut first = remote_message("r1", "bob", "old");
        first.time_received = Some(5);
        h.emit(
            PeerAction::MessageTranscript,
            &vec![TranscriptEntry::Message(first)],
            "p2",
        );
        settle().await;
        assert_eq!(h.ids(), vec!["r1"]);

        let mut second = remote_message("r2", "carol", "other");
        second.time_received = Some(6);
        h.emit(
            PeerAction::MessageTranscript,
            &vec![TranscriptEntry::Message(second)],
            "p3",
        );
        settle().await;
        assert_eq!(h.ids(), vec!["r1"]);
    }

    // -- Roster --

    #[tokio::test(start_paused = true)]
    async fn peer_name_inserts_then_renames_in_place() {
        let h = harness(50);
        h.emit(PeerAction::PeerName, &"bob".to_owned(), "p2");
        settle().await;

        let roster = h.session.roster();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0], Peer::new(PeerId::from("p2"), "bob".into()));

        h.connector.emit(RoomEvent::PeerStream {
            peer_id: PeerId::from("p2"),
            stream: MediaStream::new("cam", PeerStreamType::Video),
        });
        h.emit(PeerAction::FileOffer, &Some(ContentId::from("magnet:x")), "p2");
        h.emit(PeerAction::PeerName, &"robert".to_owned(), "p2");
        settle().await;

        let roster = h.session.roster();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].user_id, "robert");
        assert_eq!(roster[0].video_state, VideoState::Playing);
        assert_eq!(roster[0].audio_state, AudioState::Stopped);
        assert_eq!(roster[0].offered_file_id, Some(ContentId::from("magnet:x")));
    }

    #[tokio::test(start_paused = true)]
    async fn leave_removes_peer_and_decrements_once() {
        let h = harness(50);
        h.join("p2");
        h.join("p3");
        h.emit(PeerAction::PeerName, &"bob".to_owned(), "p2");
        settle().await;
        assert_eq!(h.session.number_of_peers(), 3);

        h.leave("p2");
        h.leave("p3");
        settle().await;

        assert_eq!(h.session.number_of_peers(), 1);
        assert!(h.session.roster().is_empty());
        let alerts: Vec<_> = h
            .ui
            .events()
            .into_iter()
            .filter(|e| matches!(e, UiEvent::Alert(_, AlertSeverity::Warning)))
            .collect();
        assert_eq!(
            alerts,
            vec![
                UiEvent::Alert("BOB has left the room".into(), AlertSeverity::Warning),
                UiEvent::Alert("Someone has left the room".into(), AlertSeverity::Warning),
            ]
        );
    }

    // -- Unread / notifications --

    #[tokio::test(start_paused = true)]
    async fn hidden_panel_counts_unread_and_notifies() {
        let h = harness_with(
            RoomConfig::new("chatter-test"),
            50,
            UserSettings {
                play_sound_on_new_message: true,
                show_notification_on_new_message: true,
            },
        );
        h.session.set_showing_messages(false);

        h.emit(PeerAction::Message, &remote_message("r1", "bob", "hi there"), "p2");
        h.emit(
            PeerAction::MediaMessage,
            &InlineMedia {
                id: MessageId::from("r2"),
                author_id: "bob".into(),
                magnet_uri: ContentId::from("magnet:y"),
                time_sent: 2,
                time_received: None,
            },
            "p2",
        );
        settle().await;

        assert_eq!(h.session.unread_messages(), 2);
        assert!(h.session.transcript().iter().all(TranscriptEntry::is_received));
        assert_eq!(
            h.ui.events(),
            vec![
                UiEvent::Sound,
                UiEvent::Notification("BOB: hi there".into()),
                UiEvent::Sound,
                UiEvent::Notification("BOB shared media".into()),
            ]
        );

        h.session.set_showing_messages(true);
        assert_eq!(h.session.unread_messages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn focused_visible_session_stays_quiet() {
        let h = harness_with(
            RoomConfig::new("chatter-test"),
            50,
            UserSettings {
                play_sound_on_new_message: true,
                show_notification_on_new_message: true,
            },
        );
        h.emit(PeerAction::Message, &remote_message("r1", "bob", "hi"), "p2");
        settle().await;
        assert_eq!(h.session.unread_messages(), 0);
        assert!(h.ui.events().is_empty());

        h.session.set_tab_focus(false);
        h.emit(PeerAction::Message, &remote_message("r2", "bob", "yo"), "p2");
        settle().await;
        assert_eq!(h.session.unread_messages(), 0);
        assert_eq!(h.ui.events().len(), 2);
    }

    // -- Files --

    #[tokio::test(start_paused = true)]
    async fn download_failure_alerts_without_touching_state() {
        let h = harness(50);
        h.emit(PeerAction::PeerName, &"bob".to_owned(), "p2");
        h.emit(PeerAction::FileOffer, &Some(ContentId::from("magnet:z")), "p2");
        settle().await;
        h.files.fail_downloads();

        let result = h.session.download_peer_file(&PeerId::from("p2"), None).await;

        assert!(matches!(result, Err(SessionError::FileTransfer(_))));
        assert!(matches!(
            h.ui.events().last(),
            Some(UiEvent::Alert(_, AlertSeverity::Error))
        ));
        assert_eq!(h.session.roster().len(), 1);
        assert!(h.session.transcript().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn download_requires_an_offer() {
        let h = harness(50);
        h.emit(PeerAction::PeerName, &"bob".to_owned(), "p2");
        settle().await;

        let result = h.session.download_peer_file(&PeerId::from("p2"), None).await;
        assert!(matches!(result, Err(SessionError::NoOfferedFile(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reoffering_the_same_file_keeps_it_seeded() {
        let h = harness(50);
        let first = h.session.offer_file(upload("a.txt")).await.unwrap();
        let second = h.session.offer_file(upload("a.txt")).await.unwrap();

        assert_eq!(first, second);
        assert!(h.files.rescinded().is_empty());
        assert!(h.files.is_offering(&second));
        assert_eq!(h.session.offered_file_id(), Some(second));

        let replacement = h.session.offer_file(upload("b.txt")).await.unwrap();
        assert_eq!(h.files.rescinded(), vec![first]);
        assert_eq!(h.session.offered_file_id(), Some(replacement));
    }

    #[tokio::test(start_paused = true)]
    async fn rescinding_offer_broadcasts_none() {
        let h = harness(50);
        let content_id = h.session.offer_file(upload("a.txt")).await.unwrap();

        h.session.rescind_file_offer().await.unwrap();

        assert_eq!(h.session.offered_file_id(), None);
        assert_eq!(h.files.rescinded(), vec![content_id]);
        let offers = h.connector.transport().sent_on("file-offer");
        assert_eq!(offers.last().unwrap().decode::<Option<ContentId>>(), None);
    }

    // -- End to end --

    fn loopback_session(network: &LoopbackNetwork, user_id: &str) -> Arc<SessionOrchestrator> {
        loopback_session_with(
            network,
            user_id,
            MessagingConfig::default().message_transcript_size_limit,
            Arc::new(RecordingFileTransfer::default()),
        )
    }

    fn loopback_session_with(
        network: &LoopbackNetwork,
        user_id: &str,
        limit: usize,
        file_transfer: Arc<dyn FileTransfer>,
    ) -> Arc<SessionOrchestrator> {
        let config = MessagingConfig {
            message_transcript_size_limit: limit,
            ..MessagingConfig::default()
        };
        let gateway = PeerRoomGateway::open(
            network,
            &RoomConfig::new("chatter-test"),
            RoomId::from("lobby"),
            std::time::Duration::ZERO,
        )
        .unwrap();
        SessionOrchestrator::spawn(
            gateway,
            user_id,
            config,
            SessionPorts {
                file_transfer,
                app_events: Arc::new(RecordingAppEvents::default()),
                settings: Arc::new(FixedSettings(UserSettings::default())),
                names: Arc::new(UpperCaseNames),
                ids: Arc::new(SequentialIds::default()),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_receives_history_verbatim() {
        let network = LoopbackNetwork::new();
        let alice = loopback_session(&network, "alice");
        let bob = loopback_session(&network, "bob");
        settle().await;

        for n in 1..=5 {
            alice.send_message(&format!("hello {n}")).await.unwrap();
        }
        settle().await;
        assert_eq!(bob.transcript().len(), 5);

        let carol = loopback_session(&network, "carol");
        settle().await;

        let texts = |entries: Vec<TranscriptEntry>| -> Vec<(MessageId, String)> {
            entries
                .into_iter()
                .map(|e| match e {
                    TranscriptEntry::Message(m) => (m.id, m.text),
                    TranscriptEntry::InlineMedia(m) => (m.id, m.magnet_uri.0),
                })
                .collect()
        };
        let history = carol.transcript();
        assert!(history.iter().all(TranscriptEntry::is_received));
        assert_eq!(texts(history.clone()), texts(alice.transcript()));
        assert!(history == alice.transcript() || history == bob.transcript());

        let mut names: Vec<_> = carol.roster().into_iter().map(|p| p.user_id).collect();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(carol.number_of_peers(), 3);
        assert_eq!(alice.number_of_peers(), 3);

        carol.leave();
        settle().await;
        assert_eq!(alice.number_of_peers(), 2);
        assert_eq!(bob.number_of_peers(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn receiver_eviction_leaves_sender_offer_alone() {
        let network = LoopbackNetwork::new();
        let swarm = InMemoryFileSwarm::new();
        let alice_files = Arc::new(swarm.handle());
        let alice = loopback_session_with(&network, "alice", 50, alice_files.clone());
        let bob = loopback_session_with(&network, "bob", 1, Arc::new(swarm.handle()));
        settle().await;

        alice.upload_inline_media(upload("cat.png")).await.unwrap();
        let content_id = alice.transcript()[0].content_id().cloned().unwrap();
        alice.send_message("look at this").await.unwrap();
        settle().await;

        assert_eq!(bob.transcript().len(), 1);
        assert_eq!(alice.transcript().len(), 2);
        assert!(alice_files.is_offering(&content_id));
        assert!(bob.download_inline_media(&content_id).await.is_ok());
    }
}
