//! In-memory roster (client-side peer tracking).

use crate::domain::chat::Peer;
use crate::domain::identity::PeerId;

/// Known peers keyed by peer id. Insertion order is kept for display only.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    peers: Vec<Peer>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.clone()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| &p.peer_id == peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Insert a new peer, or rename an existing one leaving every other
    /// field untouched. Returns `true` on insert.
    pub fn upsert_name(&mut self, peer_id: &PeerId, user_id: &str) -> bool {
        match self.peers.iter_mut().find(|p| &p.peer_id == peer_id) {
            Some(peer) => {
                peer.user_id = user_id.to_owned();
                false
            }
            None => {
                self.peers.push(Peer::new(peer_id.clone(), user_id.to_owned()));
                true
            }
        }
    }

    /// Apply `f` to the peer if present.
    pub fn update(&mut self, peer_id: &PeerId, f: impl FnOnce(&mut Peer)) -> bool {
        match self.peers.iter_mut().find(|p| &p.peer_id == peer_id) {
            Some(peer) => {
                f(peer);
                true
            }
            None => false,
        }
    }

    pub fn insert(&mut self, peer: Peer) {
        self.remove(&peer.peer_id);
        self.peers.push(peer);
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> Option<Peer> {
        let index = self.peers.iter().position(|p| &p.peer_id == peer_id)?;
        Some(self.peers.remove(index))
    }
}
