use super::{RedisTransportError, STREAM_PAYLOAD_KEY};
use crate::transport::MessageProperties;
use crate::BoxedError;
use redis::streams::StreamId;
use serde::{Deserialize, Serialize};

/// Wire representation of one message within a stream entry
///
/// Serialized with [`serde_json`] into a single entry field. The redelivery
/// counter travels with the message because re-appending (the
/// negative-acknowledge emulation) creates a fresh entry the broker does not
/// associate with the original.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WireMessage {
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
    #[serde(default)]
    pub redeliveries: usize,
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>, BoxedError> {
        serde_json::to_vec(self).map_err(Into::into)
    }

    pub fn from_entry(entry: &StreamId) -> Result<Self, BoxedError> {
        let raw: Vec<u8> = entry
            .get(STREAM_PAYLOAD_KEY)
            .ok_or(RedisTransportError::MissingPayload)?;

        serde_json::from_slice(&raw).map_err(Into::into)
    }
}
