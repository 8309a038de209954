use super::correlation::WaitError;
use super::{listener, CorrelationTable, DestinationCache, PendingReply};
use super::{REPLY_TO_PROPERTY, REQUEST_ID_PROPERTY};
use crate::transport::{MessageProperties, MessageTransport, Producer, SubscriptionDescriptor};
use crate::BoxedError;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Error type for issuing requests
#[derive(Error, Debug)]
pub enum RequestError {
    /// The transport rejected the request before it went out
    #[error("publishing the request failed")]
    PublishFailed(#[source] BoxedError),
    /// No correlated reply arrived before the deadline
    ///
    /// Distinguishable from other failures so callers may retry, which issues
    /// a fresh request with a new correlation token.
    #[error("no reply received within {0:?}")]
    Timeout(Duration),
    /// The connection to the broker is gone and no reply could ever arrive
    #[error("transport is no longer available")]
    TransportUnavailable,
}

/// Handler for issuing a request and awaiting its correlated reply
#[async_trait]
pub trait Requestor {
    /// Publishes `payload` to `topic` and waits for the matching reply
    ///
    /// Returns the payload of the one reply carrying this request's
    /// correlation token, or an error once the timeout elapses.
    async fn request(
        &self,
        topic: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError>;
}

/// Identity and naming configuration for an [`InboxRequestor`]
#[derive(Debug, Clone)]
pub struct RequestorConfig {
    namespace: String,
    instance_id: String,
}

impl RequestorConfig {
    /// Creates a new configuration with a random instance identifier
    pub fn new<N: Into<String>>(namespace: N) -> Self {
        Self {
            namespace: namespace.into(),
            instance_id: Uuid::new_v4().to_simple().to_string(),
        }
    }

    /// Overrides the generated instance identifier
    ///
    /// The identifier has to be unique among all concurrently live instances
    /// sharing the namespace, it becomes part of the inbox topic name.
    pub fn with_instance_id<I: Into<String>>(mut self, instance_id: I) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Name of the inbox topic derived from namespace and instance identifier
    fn inbox_topic(&self) -> String {
        format!("{}.requestService.inbox.{}", self.namespace, self.instance_id)
    }

    /// Name of the inbox subscription towards the broker
    fn subscription_name(&self) -> String {
        format!("requestService.inbox.{}", self.instance_id)
    }
}

/// [`Requestor`] with a single static reply inbox per service instance
///
/// All replies to all concurrent requests of one instance arrive on one
/// non-durable, exclusively subscribed inbox topic whose name embeds the
/// instance identifier. A single background listener, started once at
/// construction, demultiplexes them to the waiting callers by correlation
/// token.
///
/// # Why one static inbox
///
/// Two other reply topologies suggest themselves and both fall short in
/// practice. Subscribing to a fresh reply topic per request multiplies
/// subscription setup cost onto every single call and leaves the broker to
/// garbage-collect thousands of throwaway topics. Covering those dynamic
/// topics with a pattern subscription instead does not help either: pattern
/// subscriptions discover newly created topics eventually, not promptly, and
/// a reply can easily arrive before the subscription does. A single
/// pre-declared inbox per instance keeps the subscribed topic set static and
/// known at subscribe time and the subscription count at one, independent of
/// how many requests are in flight.
///
/// # Lifecycle
///
/// The listener is never restarted. When its subscription fails, the instance
/// permanently loses the ability to complete requests: in-flight ones run
/// into their deadline and subsequent calls fail fast with
/// [`RequestError::TransportUnavailable`]. Dropping the requestor stops the
/// listener and wakes all remaining waiters with the same error.
pub struct InboxRequestor<T: MessageTransport> {
    inbox_topic: String,
    instance_id: String,
    table: CorrelationTable,
    destinations: DestinationCache<T>,
    online: Arc<AtomicBool>,
    listener: JoinHandle<()>,
}

impl<T> InboxRequestor<T>
where
    T: MessageTransport,
{
    /// Subscribes to the instance inbox and starts the reply listener
    pub async fn new(transport: T, config: RequestorConfig) -> Result<Self, BoxedError> {
        let transport = Arc::new(transport);
        let inbox_topic = config.inbox_topic();

        // Replies are only meaningful to the instance that is currently
        // waiting for them, nothing has to survive a reconnect.
        let descriptor =
            SubscriptionDescriptor::new(inbox_topic.clone(), config.subscription_name(), false, true);
        let subscription = transport.subscribe(descriptor).await?;

        let table = CorrelationTable::new();
        let online = Arc::new(AtomicBool::new(true));
        let listener = tokio::spawn(listener::deliver_replies(
            subscription,
            table.clone(),
            online.clone(),
        ));

        Ok(Self {
            inbox_topic,
            instance_id: config.instance_id,
            table,
            destinations: DestinationCache::new(transport),
            online,
            listener,
        })
    }

    /// Topic on which this instance receives its replies
    pub fn inbox_topic(&self) -> &str {
        &self.inbox_topic
    }

    /// Number of requests currently awaiting their reply
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    /// Registers a new in-flight request under a fresh correlation token
    fn register_request(&self) -> PendingReply {
        loop {
            let token = format!(
                "{}-{:016x}",
                self.instance_id,
                rand::thread_rng().gen::<u64>()
            );

            if let Some(pending) = self.table.register(token) {
                return pending;
            }
        }
    }
}

#[async_trait]
impl<T> Requestor for InboxRequestor<T>
where
    T: MessageTransport + Send + Sync,
{
    async fn request(
        &self,
        topic: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError> {
        assert!(!topic.is_empty(), "Destination topic may not be empty!");
        assert!(
            timeout > Duration::from_secs(0),
            "Requesting with a zero timeout could never yield a reply!"
        );

        if !self.online.load(Ordering::SeqCst) {
            return Err(RequestError::TransportUnavailable);
        }

        let producer = self
            .destinations
            .get_or_create(topic)
            .await
            .map_err(RequestError::PublishFailed)?;

        // The entry has to exist before the request goes out, a reply could
        // arrive ahead of this task resuming. The table lock is released
        // again before anything touches the network.
        let pending = self.register_request();

        let mut properties = MessageProperties::new();
        properties.insert(REPLY_TO_PROPERTY.to_owned(), self.inbox_topic.clone());
        properties.insert(REQUEST_ID_PROPERTY.to_owned(), pending.id().to_owned());

        if let Err(e) = producer.send(payload, properties).await {
            // Dropping the pending reply retires the table entry.
            return Err(RequestError::PublishFailed(e));
        }

        match pending.wait(timeout).await {
            Ok(reply) => Ok(reply),
            Err(WaitError::TimedOut) => Err(RequestError::Timeout(timeout)),
            Err(WaitError::Abandoned) => Err(RequestError::TransportUnavailable),
        }
    }
}

impl<T: MessageTransport> Drop for InboxRequestor<T> {
    fn drop(&mut self) {
        self.listener.abort();
        self.online.store(false, Ordering::SeqCst);
        self.table.clear();
    }
}
