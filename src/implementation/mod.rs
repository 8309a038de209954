//! Implementations of the [`transport`](crate::transport) traits
//!
//! Two implementations are provided: one backed by [Redis Streams](redis) for
//! production use and an in-memory [`mock`] broker for tests of components
//! consuming the transport boundary.

pub mod mock;
pub mod redis;
