//! Correlated request/reply on top of anonymous pub/sub
//!
//! A request is an ordinary published message that carries two additional
//! properties: [`REPLY_TO_PROPERTY`] names the topic the reply should be sent
//! to and [`REQUEST_ID_PROPERTY`] holds a correlation token that is unique
//! among all requests currently in flight on the issuing service instance.
//! A well-behaved reply producer that intends to answer echoes the token back
//! verbatim in the [`SOURCE_REQUEST_ID_PROPERTY`] of its reply. Replies
//! without it cannot be attributed to any caller and are treated as protocol
//! violations.
//!
//! Every service instance owns exactly one reply destination, its *inbox
//! topic*, established at construction and embedding a unique instance
//! identifier. All replies to all concurrent requests of that instance arrive
//! there and a single background listener distributes them to the waiting
//! callers by correlation token. See [`InboxRequestor`] for the reasoning
//! behind this topology.

mod correlation;
mod destination;
mod listener;
mod requestor;
mod responder;

pub use destination::DestinationCache;
pub use requestor::{InboxRequestor, RequestError, Requestor, RequestorConfig};
pub use responder::{Responder, RequestProcessor};

pub(crate) use correlation::{CorrelationTable, PendingReply};

/// Property on a request naming the topic its reply should be published to
pub const REPLY_TO_PROPERTY: &str = "reply_to";

/// Property on a request carrying the caller-generated correlation token
pub const REQUEST_ID_PROPERTY: &str = "request_id";

/// Property on a reply echoing the correlation token of the request it answers
pub const SOURCE_REQUEST_ID_PROPERTY: &str = "source_request_id";
