//! Capability boundary towards the underlying messaging system
//!
//! The correlation machinery in the [`request`](crate::request) module does not
//! talk to a broker directly. Instead it consumes the narrow set of traits
//! defined here: a [`MessageTransport`] hands out [`Producer`]s for publishing
//! and [`Subscription`]s for consuming. Messages received from a subscription
//! are represented as [`Delivery`] entries which carry the payload, a
//! string-keyed property map and the means to acknowledge or reject them.
//!
//! Publishing is fire-and-forget: a [`Producer::send`] call completes once the
//! transport client has accepted the message, it does not await broker-side
//! acknowledgement. Delivery of individual messages to a given subscription is
//! assumed to be at-least-once; durability across broker restarts and
//! federation are outside the scope of this boundary.

use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::collections::HashMap;

/// String-keyed metadata attached to a published message
pub type MessageProperties = HashMap<String, String>;

/// Parameters describing a subscription on a topic
///
/// The `name` identifies the subscription towards the broker. Subscribing
/// twice with the same name on the same topic joins the existing subscription
/// (sharing its delivery stream) rather than creating an independent one,
/// subject to the `exclusive` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDescriptor {
    topic: String,
    name: String,
    durable: bool,
    exclusive: bool,
}

impl SubscriptionDescriptor {
    /// Creates a new instance from raw parts
    pub fn new<T: Into<String>, N: Into<String>>(
        topic: T,
        name: N,
        durable: bool,
        exclusive: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            name: name.into(),
            durable,
            exclusive,
        }
    }

    /// Topic the subscription attaches to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Name identifying the subscription towards the broker
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the subscription outlives a disconnect
    ///
    /// Non-durable subscriptions start at the current end of the topic and
    /// leave no state behind when they go away. Appropriate for data that is
    /// only meaningful to the currently connected consumer.
    pub fn durable(&self) -> bool {
        self.durable
    }

    /// Whether only a single consumer may be attached at any time
    pub fn exclusive(&self) -> bool {
        self.exclusive
    }
}

/// Message received from a [`Subscription`]
///
/// Every delivery has to be either [`acknowledged`](Delivery::acknowledge)
/// once processing succeeded or [`rejected`](Delivery::reject) to request
/// redelivery through the transport.
#[async_trait]
pub trait Delivery {
    /// Opaque payload of the message
    fn payload(&self) -> &[u8];

    /// Retrieves a property by key, if present
    fn property(&self, key: &str) -> Option<&str>;

    /// Acknowledges the message as processed
    async fn acknowledge(&mut self) -> EmptyResult;

    /// Negatively acknowledges the message, triggering transport-level redelivery
    async fn reject(&mut self) -> EmptyResult;
}

/// Handle for publishing messages to one destination topic
///
/// Producers are expensive to create, cheap to reuse and safe to share across
/// concurrent publishes. Callers are expected to retain them, see
/// [`DestinationCache`](crate::request::DestinationCache).
#[async_trait]
pub trait Producer {
    /// Publishes a payload with the given properties, fire-and-forget
    async fn send(&self, payload: &[u8], properties: MessageProperties) -> EmptyResult;
}

/// Stream of incoming messages on one subscription
#[async_trait]
pub trait Subscription {
    /// Type of entries yielded by this subscription
    type Entry: Delivery + Send;

    /// Waits for and returns the next message
    ///
    /// An `Err(_)` indicates that the subscription itself has failed (e.g. the
    /// connection to the broker was lost) and no further messages will ever be
    /// returned. Failures tied to an individual message are reported through
    /// the [`Delivery`] entry instead.
    async fn receive(&mut self) -> Result<Self::Entry, BoxedError>;
}

/// Factory providing access to a messaging system
///
/// Implementations encapsulate the connection handling towards a concrete
/// broker. They are cheap to clone and safe to use from multiple tasks.
#[async_trait]
pub trait MessageTransport {
    /// [`Producer`] implementation type
    type Producer: Producer + Send + Sync + 'static;
    /// [`Subscription`] implementation type
    type Subscription: Subscription + Send + 'static;

    /// Creates a new producer for the given topic
    async fn create_producer(&self, topic: &str) -> Result<Self::Producer, BoxedError>;

    /// Attaches a new subscription to the transport
    async fn subscribe(
        &self,
        descriptor: SubscriptionDescriptor,
    ) -> Result<Self::Subscription, BoxedError>;
}
