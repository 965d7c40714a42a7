//! CBOR encoding of action payloads.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes / decodes action payloads using CBOR (via `serde_cbor`).
pub struct CborCodec;

impl CborCodec {
    pub fn encode<T: Serialize>(value: &T) -> anyhow::Result<Bytes> {
        serde_cbor::to_vec(value).map(Bytes::from).map_err(Into::into)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> anyhow::Result<T> {
        serde_cbor::from_slice(data).map_err(Into::into)
    }
}
