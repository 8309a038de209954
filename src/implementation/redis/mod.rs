//! Trait implementations using [`redis`](::redis)
//!
//! Topics map onto [Redis Streams](https://redis.io/topics/streams-intro),
//! subscriptions onto consumer groups. Messages are stored as a single
//! JSON-serialized field per stream entry carrying the payload and the
//! property map. Redis has no native negative-acknowledge, a rejected
//! delivery is re-appended to the stream and the original entry acknowledged,
//! which yields prompt redelivery at the cost of ordering (which this
//! transport does not guarantee anyway).

const STREAM_PAYLOAD_KEY: &str = "message";
const STREAM_ID_NEW: &str = "*";
const STREAM_ID_HEAD: &str = "0";
const STREAM_ID_TAIL: &str = "$";
const STREAM_ID_ADDITIONS: &str = ">";

/// Number of redeliveries after which a delivery is dropped instead of
/// re-appended, a consumer that rejects the same message over and over would
/// otherwise trade it with the broker indefinitely.
const REDELIVERY_LIMIT: usize = 3;

use thiserror::Error;

mod envelope;
mod factory;
mod producer;
mod subscription;
mod transport;

pub use factory::*;
pub use producer::*;
pub use subscription::*;
pub use transport::*;

use envelope::WireMessage;

#[derive(Debug, Error)]
enum RedisTransportError {
    #[error("message field missing from stream entry")]
    MissingPayload,
}
