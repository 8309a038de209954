//! Synchronous request/reply semantics on top of topic-based pub/sub messaging
//!
//! Message brokers deliver published messages to anonymous subscribers and carry
//! no built-in notion of "this reply answers that request". This crate layers a
//! blocking call semantic on top of such a transport: a caller publishes a
//! request to a well-known topic and receives, within a bounded amount of time,
//! the one reply that correlates with it.
//!
//! The building blocks are split across two seams:
//!
//! 1. The [`transport`] module defines the narrow set of capabilities required
//!    from the underlying messaging system (publish with properties, subscribe,
//!    acknowledge). Implementations for Redis Streams and an in-memory broker
//!    live in the [`implementation`] module.
//! 2. The [`request`] module contains the correlation machinery itself: the
//!    [`Requestor`](request::Requestor) issuing requests and demultiplexing
//!    replies, and the [`Responder`](request::Responder) answering them on the
//!    other side of the broker.
//!
//! Everything domain specific (what a request means, how a reply is computed)
//! stays outside of this crate. It only moves opaque payloads and the small
//! set of wire properties documented in the [`request`] module.

#![deny(missing_docs)]
#![allow(clippy::nonstandard_macro_braces)]

pub mod implementation;
pub mod request;
pub mod transport;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
