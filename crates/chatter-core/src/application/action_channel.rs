//! Typed, named broadcast/unicast channel over the room's action primitive.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::domain::identity::PeerId;

use super::codec::CborCodec;
use super::peer_room::PeerRoomGateway;

/// Binds one namespace to one payload type.
pub struct ActionChannel<T> {
    gateway: Arc<PeerRoomGateway>,
    namespace: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> ActionChannel<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(gateway: Arc<PeerRoomGateway>, namespace: impl Into<String>) -> Self {
        Self {
            gateway,
            namespace: namespace.into(),
            _payload: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Send to `target`, or broadcast to every peer when `None`.
    pub async fn send(&self, payload: &T, target: Option<&PeerId>) -> anyhow::Result<()> {
        let bytes = CborCodec::encode(payload)?;
        self.gateway.send(&self.namespace, bytes, target).await
    }

    /// Bind the receiver for this namespace, replacing any previous one.
    /// Payloads that fail to decode are logged and dropped.
    pub fn on_receive(&self, receiver: impl Fn(T, &PeerId) + Send + Sync + 'static) {
        let namespace = self.namespace.clone();
        self.gateway.subscribe(&self.namespace, move |payload, from| {
            match CborCodec::decode::<T>(&payload) {
                Ok(value) => receiver(value, from),
                Err(e) => warn!(%namespace, %from, "Dropping undecodable action payload: {e}"),
            }
        });
    }
}
