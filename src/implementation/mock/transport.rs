use crate::transport::{
    Delivery, MessageProperties, MessageTransport, Producer, Subscription, SubscriptionDescriptor,
};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use log::warn;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// Number of redeliveries after which the broker drops a message
///
/// Prevents a delivery that is rejected over and over again from bouncing
/// between broker and consumer indefinitely. Real brokers move such messages
/// to a dead-letter topic after a comparable number of attempts.
const REDELIVERY_LIMIT: usize = 3;

const LOCK_POISONED: &str = "mock broker lock poisoned";

#[derive(Clone)]
struct MockMessage {
    payload: Vec<u8>,
    properties: MessageProperties,
    redeliveries: usize,
}

struct BrokerState {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<MockMessage>>>>,
    failing_topics: Mutex<HashSet<String>>,
    created_producers: AtomicUsize,
    rejected_deliveries: AtomicUsize,
    dropped_messages: AtomicUsize,
    // Raised on shutdown to unblock subscriptions idling in `receive`, their
    // local queues stay open through the requeue sender they hold themselves.
    closed: watch::Sender<bool>,
}

impl Default for BrokerState {
    fn default() -> Self {
        let (closed, _) = watch::channel(false);

        Self {
            topics: Mutex::default(),
            failing_topics: Mutex::default(),
            created_producers: AtomicUsize::default(),
            rejected_deliveries: AtomicUsize::default(),
            dropped_messages: AtomicUsize::default(),
            closed,
        }
    }
}

impl BrokerState {
    fn publish(&self, topic: &str, message: MockMessage) -> EmptyResult {
        if self.failing_topics.lock().expect(LOCK_POISONED).contains(topic) {
            return Err(format!("injected publish failure on {}", topic).into());
        }

        let mut topics = self.topics.lock().expect(LOCK_POISONED);

        if let Some(subscribers) = topics.get_mut(topic) {
            // Forget subscriptions that have gone away in the meantime
            subscribers.retain(|subscriber| subscriber.send(message.clone()).is_ok());
        }

        Ok(())
    }
}

/// In-memory [`MessageTransport`] for tests
///
/// Clones share the same broker, handing one transport to the component under
/// test and keeping another for assertions and message injection is the
/// intended usage.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<BrokerState>,
}

impl MockTransport {
    /// Number of producers created through this broker so far
    pub fn created_producers(&self) -> usize {
        self.state.created_producers.load(Ordering::SeqCst)
    }

    /// Number of deliveries that consumers have rejected so far
    pub fn rejected_deliveries(&self) -> usize {
        self.state.rejected_deliveries.load(Ordering::SeqCst)
    }

    /// Number of messages dropped after exhausting their redeliveries
    pub fn dropped_messages(&self) -> usize {
        self.state.dropped_messages.load(Ordering::SeqCst)
    }

    /// Makes all future publishes to the given topic fail
    pub fn fail_publishes_to(&self, topic: &str) {
        self.state
            .failing_topics
            .lock()
            .expect(LOCK_POISONED)
            .insert(topic.to_owned());
    }

    /// Severs all subscriptions, simulating the loss of the broker connection
    ///
    /// Pending `receive` calls return an error once their local queue runs
    /// dry, subsequent publishes go nowhere.
    pub fn shutdown(&self) {
        self.state.topics.lock().expect(LOCK_POISONED).clear();
        self.state.closed.send(true).ok();
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    type Producer = MockProducer;
    type Subscription = MockSubscription;

    async fn create_producer(&self, topic: &str) -> Result<Self::Producer, BoxedError> {
        self.state.created_producers.fetch_add(1, Ordering::SeqCst);

        Ok(MockProducer {
            topic: topic.to_owned(),
            state: self.state.clone(),
        })
    }

    async fn subscribe(
        &self,
        descriptor: SubscriptionDescriptor,
    ) -> Result<Self::Subscription, BoxedError> {
        let (sender, receiver) = mpsc::unbounded_channel();

        self.state
            .topics
            .lock()
            .expect(LOCK_POISONED)
            .entry(descriptor.topic().to_owned())
            .or_default()
            .push(sender.clone());

        Ok(MockSubscription {
            descriptor,
            receiver,
            requeue: sender,
            closed: self.state.closed.subscribe(),
            state: self.state.clone(),
        })
    }
}

/// In-memory [`Producer`] for tests
pub struct MockProducer {
    topic: String,
    state: Arc<BrokerState>,
}

#[async_trait]
impl Producer for MockProducer {
    async fn send(&self, payload: &[u8], properties: MessageProperties) -> EmptyResult {
        self.state.publish(
            &self.topic,
            MockMessage {
                payload: payload.to_vec(),
                properties,
                redeliveries: 0,
            },
        )
    }
}

/// In-memory [`Subscription`] for tests
pub struct MockSubscription {
    descriptor: SubscriptionDescriptor,
    receiver: mpsc::UnboundedReceiver<MockMessage>,
    requeue: mpsc::UnboundedSender<MockMessage>,
    closed: watch::Receiver<bool>,
    state: Arc<BrokerState>,
}

impl MockSubscription {
    fn connection_lost(&self) -> BoxedError {
        format!(
            "subscription {} lost its connection to the broker",
            self.descriptor.name()
        )
        .into()
    }
}

#[async_trait]
impl Subscription for MockSubscription {
    type Entry = MockDelivery;

    async fn receive(&mut self) -> Result<Self::Entry, BoxedError> {
        if *self.closed.borrow() {
            return Err(self.connection_lost());
        }

        tokio::select! {
            message = self.receiver.recv() => match message {
                Some(message) => Ok(MockDelivery {
                    message,
                    requeue: self.requeue.clone(),
                    state: self.state.clone(),
                }),
                None => Err(self.connection_lost()),
            },
            _ = self.closed.changed() => Err(self.connection_lost()),
        }
    }
}

/// Message handed out by a [`MockSubscription`]
pub struct MockDelivery {
    message: MockMessage,
    requeue: mpsc::UnboundedSender<MockMessage>,
    state: Arc<BrokerState>,
}

#[async_trait]
impl Delivery for MockDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn property(&self, key: &str) -> Option<&str> {
        self.message.properties.get(key).map(String::as_str)
    }

    async fn acknowledge(&mut self) -> EmptyResult {
        Ok(())
    }

    async fn reject(&mut self) -> EmptyResult {
        self.state.rejected_deliveries.fetch_add(1, Ordering::SeqCst);

        if self.message.redeliveries >= REDELIVERY_LIMIT {
            warn!("Dropping message after {} redeliveries", REDELIVERY_LIMIT);
            self.state.dropped_messages.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let mut message = self.message.clone();
        message.redeliveries += 1;

        self.requeue
            .send(message)
            .map_err(|_| "subscription is no longer attached".into())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn attached_subscription(transport: &MockTransport, topic: &str) -> MockSubscription {
        let descriptor = SubscriptionDescriptor::new(topic, "test", false, false);
        transport.subscribe(descriptor).await.unwrap()
    }

    #[tokio::test]
    async fn fan_messages_out_to_all_subscriptions() {
        let transport = MockTransport::default();
        let mut first = attached_subscription(&transport, "topic").await;
        let mut second = attached_subscription(&transport, "topic").await;

        let producer = transport.create_producer("topic").await.unwrap();
        producer.send(b"hello", MessageProperties::new()).await.unwrap();

        assert_eq!(first.receive().await.unwrap().payload(), b"hello");
        assert_eq!(second.receive().await.unwrap().payload(), b"hello");
    }

    #[tokio::test]
    async fn redeliver_rejected_messages() {
        let transport = MockTransport::default();
        let mut subscription = attached_subscription(&transport, "topic").await;

        let producer = transport.create_producer("topic").await.unwrap();
        producer.send(b"retry me", MessageProperties::new()).await.unwrap();

        let mut delivery = subscription.receive().await.unwrap();
        delivery.reject().await.unwrap();

        let redelivered = subscription.receive().await.unwrap();
        assert_eq!(redelivered.payload(), b"retry me");
        assert_eq!(transport.rejected_deliveries(), 1);
    }

    #[tokio::test]
    async fn drop_messages_once_redeliveries_are_exhausted() {
        let transport = MockTransport::default();
        let mut subscription = attached_subscription(&transport, "topic").await;

        let producer = transport.create_producer("topic").await.unwrap();
        producer.send(b"poison", MessageProperties::new()).await.unwrap();

        for _ in 0..=REDELIVERY_LIMIT {
            let mut delivery = subscription.receive().await.unwrap();
            delivery.reject().await.unwrap();
        }

        assert_eq!(transport.dropped_messages(), 1);
    }

    #[tokio::test]
    async fn fail_publishes_on_demand() {
        let transport = MockTransport::default();
        let producer = transport.create_producer("topic").await.unwrap();

        transport.fail_publishes_to("topic");

        assert!(producer
            .send(b"hello", MessageProperties::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn report_the_loss_of_the_broker() {
        let transport = MockTransport::default();
        let mut subscription = attached_subscription(&transport, "topic").await;

        transport.shutdown();

        assert!(subscription.receive().await.is_err());
    }
}
