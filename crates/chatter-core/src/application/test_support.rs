//! Recording fakes for use-case tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use crate::domain::config::RoomConfig;
use crate::domain::identity::{ContentId, MessageId, PeerId, RoomId};
use crate::domain::media::MediaStream;

use super::codec::CborCodec;
use super::ports::{
    AlertSeverity, AppEvents, DownloadOptions, FileTransfer, FileUpload, IdGenerator, JoinedRoom,
    PeerNames, RoomConnector, RoomEvent, RoomTransport, SettingsSource, UserSettings,
};

/// Let every runnable task finish. Requires a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentAction {
    pub namespace: String,
    pub payload: Bytes,
    pub target: Option<PeerId>,
}

impl SentAction {
    pub fn decode<T: DeserializeOwned>(&self) -> T {
        CborCodec::decode(&self.payload).expect("decodable payload")
    }
}

pub struct RecordingTransport {
    peers: Mutex<Vec<PeerId>>,
    sent: Mutex<Vec<SentAction>>,
    published: Mutex<Vec<(MediaStream, Instant)>>,
    removed: Mutex<Vec<MediaStream>>,
    leave_calls: AtomicUsize,
    hold_sends: AtomicBool,
    gate: Semaphore,
    failing: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            leave_calls: AtomicUsize::new(0),
            hold_sends: AtomicBool::new(false),
            gate: Semaphore::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentAction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_on(&self, namespace: &str) -> Vec<SentAction> {
        self.sent()
            .into_iter()
            .filter(|s| s.namespace == namespace)
            .collect()
    }

    pub fn published_streams(&self) -> Vec<(MediaStream, Instant)> {
        self.published.lock().unwrap().clone()
    }

    pub fn removed_streams(&self) -> Vec<MediaStream> {
        self.removed.lock().unwrap().clone()
    }

    pub fn leave_calls(&self) -> usize {
        self.leave_calls.load(Ordering::SeqCst)
    }

    pub fn set_peers(&self, peers: Vec<PeerId>) {
        *self.peers.lock().unwrap() = peers;
    }

    /// Park every subsequent send until released.
    pub fn hold_sends(&self) {
        self.hold_sends.store(true, Ordering::SeqCst);
    }

    pub fn release_sends(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn fail_namespace(&self, namespace: &str) {
        self.failing.lock().unwrap().insert(namespace.to_owned());
    }
}

#[async_trait]
impl RoomTransport for RecordingTransport {
    fn self_id(&self) -> PeerId {
        PeerId::from("self")
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers.lock().unwrap().clone()
    }

    async fn send(
        &self,
        namespace: &str,
        payload: Bytes,
        target: Option<&PeerId>,
    ) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(SentAction {
            namespace: namespace.to_owned(),
            payload,
            target: target.cloned(),
        });
        if self.hold_sends.load(Ordering::SeqCst) {
            self.gate.acquire().await?.forget();
        }
        if self.failing.lock().unwrap().contains(namespace) {
            anyhow::bail!("simulated failure on {namespace}");
        }
        Ok(())
    }

    async fn add_stream(
        &self,
        stream: &MediaStream,
        _targets: Option<&[PeerId]>,
    ) -> anyhow::Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((stream.clone(), Instant::now()));
        Ok(())
    }

    fn remove_stream(&self, stream: &MediaStream, _targets: Option<&[PeerId]>) {
        self.removed.lock().unwrap().push(stream.clone());
    }

    fn leave(&self) {
        self.leave_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one [`RecordingTransport`] and keeps the event sender so tests
/// can inject raw room events.
pub struct RecordingConnector {
    transport: Arc<RecordingTransport>,
    events: Mutex<Option<mpsc::UnboundedSender<RoomEvent>>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self {
            transport: Arc::new(RecordingTransport::new()),
            events: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> Arc<RecordingTransport> {
        Arc::clone(&self.transport)
    }

    pub fn emit(&self, event: RoomEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl RoomConnector for RecordingConnector {
    fn join(&self, _config: &RoomConfig, _room_id: &RoomId) -> anyhow::Result<JoinedRoom> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok(JoinedRoom {
            transport: self.transport.clone(),
            events: rx,
        })
    }
}

// ---------------------------------------------------------------------------
// File transfer
// ---------------------------------------------------------------------------

/// Content-addressed by file names: offering the same names twice yields the
/// same id.
#[derive(Default)]
pub struct RecordingFileTransfer {
    offering: Mutex<HashSet<ContentId>>,
    rescinded: Mutex<Vec<ContentId>>,
    fail_downloads: AtomicBool,
}

impl RecordingFileTransfer {
    pub fn rescinded(&self) -> Vec<ContentId> {
        self.rescinded.lock().unwrap().clone()
    }

    pub fn stop_offering(&self, content_id: &ContentId) {
        self.offering.lock().unwrap().remove(content_id);
    }

    pub fn fail_downloads(&self) {
        self.fail_downloads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileTransfer for RecordingFileTransfer {
    async fn offer(&self, files: Vec<FileUpload>, _room_id: &RoomId) -> anyhow::Result<ContentId> {
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        let id = ContentId(format!("magnet:{}", names.join(",")));
        self.offering.lock().unwrap().insert(id.clone());
        Ok(id)
    }

    async fn download(
        &self,
        content_id: &ContentId,
        _room_id: &RoomId,
        options: DownloadOptions,
    ) -> anyhow::Result<Vec<FileUpload>> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            anyhow::bail!("no seeders for {content_id}");
        }
        if let Some(on_progress) = options.on_progress {
            on_progress(1.0);
        }
        Ok(vec![FileUpload {
            name: content_id.0.clone(),
            bytes: Bytes::from_static(b"data"),
        }])
    }

    fn rescind(&self, content_id: &ContentId) {
        self.offering.lock().unwrap().remove(content_id);
        self.rescinded.lock().unwrap().push(content_id.clone());
    }

    fn is_offering(&self, content_id: &ContentId) -> bool {
        self.offering.lock().unwrap().contains(content_id)
    }
}

// ---------------------------------------------------------------------------
// UI bridge and queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Alert(String, AlertSeverity),
    Sound,
    Notification(String),
}

#[derive(Default)]
pub struct RecordingAppEvents {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingAppEvents {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppEvents for RecordingAppEvents {
    async fn emit_alert(&self, text: &str, severity: AlertSeverity) {
        self.events
            .lock()
            .unwrap()
            .push(UiEvent::Alert(text.to_owned(), severity));
    }

    async fn play_new_message_sound(&self) {
        self.events.lock().unwrap().push(UiEvent::Sound);
    }

    async fn show_notification(&self, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push(UiEvent::Notification(text.to_owned()));
    }
}

pub struct FixedSettings(pub UserSettings);

impl SettingsSource for FixedSettings {
    fn user_settings(&self) -> UserSettings {
        self.0
    }
}

pub struct UpperCaseNames;

impl PeerNames for UpperCaseNames {
    fn display_name(&self, user_id: &str) -> String {
        user_id.to_uppercase()
    }
}

#[derive(Default)]
pub struct SequentialIds {
    next: AtomicUsize,
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> MessageId {
        MessageId(format!("msg-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1))
    }
}
