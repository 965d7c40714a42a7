//! PeerRoomGateway — owns the room handle and turns the transport's
//! fire-and-forget callbacks into keyed, idempotent subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::domain::config::RoomConfig;
use crate::domain::identity::{PeerId, RoomId};
use crate::domain::media::{MediaStream, PeerHookType, PeerStreamType};

use super::action_channel::ActionChannel;
use super::ports::{JoinedRoom, RoomConnector, RoomEvent, RoomTransport};
use super::registry::HandlerRegistry;
use super::stream_queue::StreamQueue;

pub type PeerHandler = Arc<dyn Fn(&PeerId) + Send + Sync>;
pub type StreamHandler = Arc<dyn Fn(&PeerId, &MediaStream) + Send + Sync>;
pub type ActionHandler = Arc<dyn Fn(Bytes, &PeerId) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Join,
    Leave,
    Stream,
}

pub struct PeerRoomGateway {
    room_id: RoomId,
    is_private: bool,
    transport: Arc<dyn RoomTransport>,
    /// Taken by [`PeerRoomGateway::start`].
    events: Mutex<Option<mpsc::UnboundedReceiver<RoomEvent>>>,
    join_handlers: HandlerRegistry<PeerHookType, PeerHandler>,
    leave_handlers: HandlerRegistry<PeerHookType, PeerHandler>,
    stream_handlers: HandlerRegistry<PeerStreamType, StreamHandler>,
    /// Action bindings: namespace -> receiver. Last binding wins.
    actions: Mutex<HashMap<String, ActionHandler>>,
    stream_queue: Arc<StreamQueue>,
    closed: AtomicBool,
}

impl PeerRoomGateway {
    /// Join `room_id`. A configuration the transport rejects is returned as
    /// an error; there is no retry.
    ///
    /// Events are buffered until [`PeerRoomGateway::start`] is called, so
    /// handlers registered in between miss nothing.
    pub fn open(
        connector: &dyn RoomConnector,
        config: &RoomConfig,
        room_id: RoomId,
        stream_queue_add_delay: Duration,
    ) -> anyhow::Result<Arc<Self>> {
        let JoinedRoom { transport, events } = connector
            .join(config, &room_id)
            .with_context(|| format!("failed to join room {room_id}"))?;

        info!(%room_id, private = config.is_private(), self_id = %transport.self_id(), "Joined room");

        Ok(Arc::new(Self {
            room_id,
            is_private: config.is_private(),
            transport,
            events: Mutex::new(Some(events)),
            join_handlers: HandlerRegistry::new(),
            leave_handlers: HandlerRegistry::new(),
            stream_handlers: HandlerRegistry::new(),
            actions: Mutex::new(HashMap::new()),
            stream_queue: Arc::new(StreamQueue::new(stream_queue_add_delay)),
            closed: AtomicBool::new(false),
        }))
    }

    /// Begin dispatching transport events. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let Some(mut events) = self.events.lock().unwrap().take() else {
            return;
        };
        let gateway: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match gateway.upgrade() {
                    Some(gateway) => gateway.dispatch(event),
                    None => break,
                }
            }
            debug!("Room event stream ended");
        });
    }

    /// Leave the room and drop every registration. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport.leave();
        self.clear_handlers(HandlerKind::Join);
        self.clear_handlers(HandlerKind::Leave);
        self.clear_handlers(HandlerKind::Stream);
        self.actions.lock().unwrap().clear();
        self.stream_queue.clear();
        info!(room_id = %self.room_id, "Left room");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    pub fn self_id(&self) -> PeerId {
        self.transport.self_id()
    }

    // -- Hooks --

    pub fn on_peer_join(&self, key: PeerHookType, handler: impl Fn(&PeerId) + Send + Sync + 'static) {
        self.join_handlers.set(key, Arc::new(handler));
    }

    pub fn on_peer_leave(&self, key: PeerHookType, handler: impl Fn(&PeerId) + Send + Sync + 'static) {
        self.leave_handlers.set(key, Arc::new(handler));
    }

    pub fn on_peer_stream(
        &self,
        key: PeerStreamType,
        handler: impl Fn(&PeerId, &MediaStream) + Send + Sync + 'static,
    ) {
        self.stream_handlers.set(key, Arc::new(handler));
    }

    pub fn clear_handlers(&self, kind: HandlerKind) {
        match kind {
            HandlerKind::Join => self.join_handlers.clear(),
            HandlerKind::Leave => self.leave_handlers.clear(),
            HandlerKind::Stream => self.stream_handlers.clear(),
        }
    }

    pub fn handler_count(&self, kind: HandlerKind) -> usize {
        match kind {
            HandlerKind::Join => self.join_handlers.len(),
            HandlerKind::Leave => self.leave_handlers.len(),
            HandlerKind::Stream => self.stream_handlers.len(),
        }
    }

    /// Connected peers according to the transport, independent of any roster.
    pub fn list_peers(&self) -> Vec<PeerId> {
        self.transport.peers()
    }

    // -- Actions --

    /// Typed channel bound to `namespace`.
    pub fn make_action<T>(self: &Arc<Self>, namespace: &str) -> ActionChannel<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        ActionChannel::new(Arc::clone(self), namespace)
    }

    pub async fn send(
        &self,
        namespace: &str,
        payload: Bytes,
        target: Option<&PeerId>,
    ) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("room {} has been left", self.room_id);
        }
        trace!(namespace, ?target, len = payload.len(), "Sending action");
        self.transport.send(namespace, payload, target).await
    }

    pub fn subscribe(&self, namespace: &str, handler: impl Fn(Bytes, &PeerId) + Send + Sync + 'static) {
        self.actions
            .lock()
            .unwrap()
            .insert(namespace.to_owned(), Arc::new(handler));
    }

    // -- Streams --

    /// Queue a stream publication behind any pending ones. Never touches the
    /// transport directly.
    pub fn publish_stream(&self, stream: MediaStream, targets: Option<Vec<PeerId>>) {
        if self.is_closed() {
            warn!(stream_id = %stream.id, "Ignoring stream publication after leaving room");
            return;
        }
        let transport = Arc::clone(&self.transport);
        self.stream_queue.enqueue_publication(Box::new(move || {
            Box::pin(async move {
                debug!(stream_id = %stream.id, kind = ?stream.kind, "Publishing stream");
                if let Err(e) = transport.add_stream(&stream, targets.as_deref()).await {
                    warn!(stream_id = %stream.id, "Failed to publish stream: {e}");
                }
            })
        }));
    }

    pub fn unpublish_stream(&self, stream: &MediaStream, targets: Option<&[PeerId]>) {
        self.transport.remove_stream(stream, targets);
    }

    pub fn pending_stream_tasks(&self) -> usize {
        self.stream_queue.pending()
    }

    // -- Dispatch --

    /// Fan one transport event out to every registered handler, in
    /// registration order.
    pub fn dispatch(&self, event: RoomEvent) {
        match event {
            RoomEvent::PeerJoin(peer_id) => {
                debug!(%peer_id, "Peer joined");
                for handler in self.join_handlers.snapshot() {
                    handler(&peer_id);
                }
            }
            RoomEvent::PeerLeave(peer_id) => {
                debug!(%peer_id, "Peer left");
                for handler in self.leave_handlers.snapshot() {
                    handler(&peer_id);
                }
            }
            RoomEvent::PeerStream { peer_id, stream } => {
                debug!(%peer_id, stream_id = %stream.id, kind = ?stream.kind, "Peer stream");
                for handler in self.stream_handlers.snapshot() {
                    handler(&peer_id, &stream);
                }
            }
            RoomEvent::Action {
                namespace,
                payload,
                from,
            } => {
                let handler = self.actions.lock().unwrap().get(&namespace).cloned();
                match handler {
                    Some(handler) => handler(payload, &from),
                    None => warn!(%namespace, %from, "No receiver bound for action"),
                }
            }
        }
    }
}
