use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use quorumkv_core::NodeId;

use crate::error::TransportError;

/// A single message on the wire: a stable tag (from `quorumkv_core::wire`), a
/// bincode-encoded body, and an optional reply port for request/response RPCs.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: NodeId,
    pub tag: u32,
    pub port: Option<u64>,
    pub payload: Bytes,
}

impl Envelope {
    pub fn encode<T: Serialize>(from: NodeId, tag: u32, port: Option<u64>, body: &T) -> Result<Self, TransportError> {
        let payload = bincode::serialize(body)?;
        Ok(Self { from, tag, port, payload: Bytes::from(payload) })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}
