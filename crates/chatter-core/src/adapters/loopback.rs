//! In-process room transport.
//!
//! Every [`LoopbackNetwork`] clone shares one set of rooms, so several
//! sessions in the same process can find each other. Rooms are keyed by
//! app id, room id and room secret: peers using different passwords for the
//! same room id never meet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::application::ports::{JoinedRoom, RoomConnector, RoomEvent, RoomTransport};
use crate::domain::config::RoomConfig;
use crate::domain::identity::{PeerId, RoomId};
use crate::domain::media::MediaStream;

// ---------------------------------------------------------------------------
// Room state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RoomKey {
    app_id: String,
    room_id: RoomId,
    secret: String,
}

struct Room {
    /// Join order is kept so peers are listed and notified deterministically.
    members: Vec<(PeerId, mpsc::UnboundedSender<RoomEvent>)>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    fn sender(&self, peer_id: &PeerId) -> Option<&mpsc::UnboundedSender<RoomEvent>> {
        self.members
            .iter()
            .find(|(id, _)| id == peer_id)
            .map(|(_, tx)| tx)
    }

    /// Deliver to every member except `from`.
    fn broadcast(&self, from: &PeerId, event: &RoomEvent) {
        for (peer_id, tx) in &self.members {
            if peer_id != from {
                let _ = tx.send(event.clone());
            }
        }
    }
}

type Rooms = Arc<Mutex<HashMap<RoomKey, Room>>>;

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    rooms: Rooms,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members currently in `room_id` under `config`.
    #[cfg(test)]
    fn occupancy(&self, config: &RoomConfig, room_id: &RoomId) -> usize {
        let key = RoomKey {
            app_id: config.app_id.clone(),
            room_id: room_id.clone(),
            secret: config.secret(room_id),
        };
        self.rooms
            .lock()
            .unwrap()
            .get(&key)
            .map_or(0, |room| room.members.len())
    }
}

impl RoomConnector for LoopbackNetwork {
    fn join(&self, config: &RoomConfig, room_id: &RoomId) -> anyhow::Result<JoinedRoom> {
        if config.app_id.trim().is_empty() {
            anyhow::bail!("app id must not be empty");
        }

        let key = RoomKey {
            app_id: config.app_id.clone(),
            room_id: room_id.clone(),
            secret: config.secret(room_id),
        };
        let self_id = PeerId(format!("{:016x}", rand::random::<u64>()));
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut rooms = self.rooms.lock().unwrap();
            let room = rooms.entry(key.clone()).or_insert_with(Room::new);
            for (peer_id, peer_tx) in &room.members {
                let _ = peer_tx.send(RoomEvent::PeerJoin(self_id.clone()));
                let _ = tx.send(RoomEvent::PeerJoin(peer_id.clone()));
            }
            room.members.push((self_id.clone(), tx));
            info!(%room_id, %self_id, members = room.members.len(), "Loopback peer joined");
        }

        Ok(JoinedRoom {
            transport: Arc::new(LoopbackTransport {
                rooms: Arc::clone(&self.rooms),
                key,
                self_id,
                left: AtomicBool::new(false),
            }),
            events: rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct LoopbackTransport {
    rooms: Rooms,
    key: RoomKey,
    self_id: PeerId,
    left: AtomicBool,
}

impl LoopbackTransport {
    fn with_room<R>(&self, f: impl FnOnce(&Room) -> anyhow::Result<R>) -> anyhow::Result<R> {
        if self.left.load(Ordering::Acquire) {
            anyhow::bail!("peer {} has left room {}", self.self_id, self.key.room_id);
        }
        let rooms = self.rooms.lock().unwrap();
        match rooms.get(&self.key) {
            Some(room) => f(room),
            None => anyhow::bail!("room {} no longer exists", self.key.room_id),
        }
    }

    fn deliver(&self, event: RoomEvent, targets: Option<&[PeerId]>) -> anyhow::Result<()> {
        self.with_room(|room| {
            match targets {
                None => room.broadcast(&self.self_id, &event),
                Some(targets) => {
                    for target in targets {
                        let tx = room.sender(target).ok_or_else(|| {
                            anyhow::anyhow!("peer {target} is not in room {}", self.key.room_id)
                        })?;
                        let _ = tx.send(event.clone());
                    }
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl RoomTransport for LoopbackTransport {
    fn self_id(&self) -> PeerId {
        self.self_id.clone()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.with_room(|room| {
            Ok(room
                .members
                .iter()
                .map(|(id, _)| id.clone())
                .filter(|id| id != &self.self_id)
                .collect())
        })
        .unwrap_or_default()
    }

    async fn send(
        &self,
        namespace: &str,
        payload: Bytes,
        target: Option<&PeerId>,
    ) -> anyhow::Result<()> {
        trace!(namespace, ?target, len = payload.len(), "Loopback action");
        let event = RoomEvent::Action {
            namespace: namespace.to_owned(),
            payload,
            from: self.self_id.clone(),
        };
        self.deliver(event, target.map(std::slice::from_ref))
    }

    async fn add_stream(
        &self,
        stream: &MediaStream,
        targets: Option<&[PeerId]>,
    ) -> anyhow::Result<()> {
        let event = RoomEvent::PeerStream {
            peer_id: self.self_id.clone(),
            stream: stream.clone(),
        };
        self.deliver(event, targets)
    }

    fn remove_stream(&self, stream: &MediaStream, _targets: Option<&[PeerId]>) {
        debug!(stream_id = %stream.id, "Loopback stream removed");
    }

    fn leave(&self) {
        if self.left.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut rooms = self.rooms.lock().unwrap();
        let Some(room) = rooms.get_mut(&self.key) else {
            return;
        };
        room.members.retain(|(id, _)| id != &self.self_id);
        room.broadcast(&self.self_id, &RoomEvent::PeerLeave(self.self_id.clone()));
        info!(room_id = %self.key.room_id, self_id = %self.self_id, "Loopback peer left");
        if room.members.is_empty() {
            rooms.remove(&self.key);
        }
    }
}
