//! In-memory transport for tests
//!
//! Provides a self-contained broker with real pub/sub semantics: messages are
//! fanned out to all subscriptions attached to a topic at publish time, a
//! rejected delivery is redelivered to the subscription it came from, and the
//! broker keeps counters that tests can assert against (created producers,
//! rejected deliveries, dropped poison messages). Publish failures can be
//! injected per topic.
//!
//! The `durable` and `exclusive` subscription flags are accepted but have no
//! observable effect in-memory, there is no disconnect to survive and no
//! second broker to contend with.

mod transport;

pub use transport::*;
