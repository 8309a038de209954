use super::{DestinationCache, REPLY_TO_PROPERTY, REQUEST_ID_PROPERTY, SOURCE_REQUEST_ID_PROPERTY};
use crate::transport::{
    Delivery, MessageProperties, MessageTransport, Producer, Subscription, SubscriptionDescriptor,
};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use log::{error, warn};
use std::sync::Arc;

/// Structure which turns request payloads into reply payloads
#[async_trait]
pub trait RequestProcessor {
    /// Handler for requests, returning the reply payload
    ///
    /// May only return `Err(_)` for system failures where a later retry could
    /// succeed, the delivery is then handed back to the transport for
    /// redelivery. Subject specific failures should be encoded in the reply
    /// payload instead.
    async fn process(&self, payload: &[u8]) -> Result<Vec<u8>, BoxedError>;
}

/// Consumes requests from a command topic and publishes correlated replies
///
/// The counterpart to an [`InboxRequestor`](super::InboxRequestor) on the
/// serving side of the broker. Every consumed message is run through the
/// [`RequestProcessor`]; a reply is only sent when the message asked for one
/// by carrying both the reply destination and the correlation token. The
/// token is echoed back verbatim, requesters drop replies without it.
pub struct Responder<T: MessageTransport, P: RequestProcessor> {
    subscription: T::Subscription,
    destinations: DestinationCache<T>,
    processor: P,
}

impl<T, P> Responder<T, P>
where
    T: MessageTransport,
    P: RequestProcessor,
{
    /// Subscribes to the given command topic
    ///
    /// Command subscriptions are usually durable and shared: requests that
    /// arrive while no responder is connected are processed once one returns,
    /// and multiple responder instances split the load between them.
    pub async fn new(
        transport: T,
        descriptor: SubscriptionDescriptor,
        processor: P,
    ) -> Result<Self, BoxedError> {
        let transport = Arc::new(transport);
        let subscription = transport.subscribe(descriptor).await?;

        Ok(Self {
            subscription,
            destinations: DestinationCache::new(transport),
            processor,
        })
    }

    /// Processes incoming requests until the subscription fails
    pub async fn run(mut self) {
        loop {
            let mut delivery = match self.subscription.receive().await {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!("Command subscription failed, responder shutting down: {}", e);
                    break;
                }
            };

            match self.answer(&delivery).await {
                Ok(_) => {
                    if let Err(e) = delivery.acknowledge().await {
                        warn!("Failed to acknowledge request: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Failed to process request, requesting redelivery: {}", e);

                    if let Err(e) = delivery.reject().await {
                        warn!("Failed to reject request: {}", e);
                    }
                }
            }
        }
    }

    /// Runs the processor and sends a reply if one was requested
    async fn answer(&self, delivery: &<T::Subscription as Subscription>::Entry) -> EmptyResult {
        let reply = self.processor.process(delivery.payload()).await?;

        let reply_to = delivery.property(REPLY_TO_PROPERTY);
        let token = delivery.property(REQUEST_ID_PROPERTY);

        if let (Some(reply_to), Some(token)) = (reply_to, token) {
            let producer = self.destinations.get_or_create(reply_to).await?;

            let mut properties = MessageProperties::new();
            properties.insert(SOURCE_REQUEST_ID_PROPERTY.to_owned(), token.to_owned());

            producer.send(&reply, properties).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::implementation::mock::MockTransport;
    use crate::request::{InboxRequestor, RequestorConfig, Requestor};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    const COMMAND_TOPIC: &str = "replyService.command.shout";

    /// Uppercases the payload and appends some emphasis
    struct Shouter {
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RequestProcessor for Shouter {
        async fn process(&self, payload: &[u8]) -> Result<Vec<u8>, BoxedError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);

            let message = String::from_utf8(payload.to_vec())?;
            Ok(format!("{}!!!", message.to_uppercase()).into_bytes())
        }
    }

    struct Unavailable;

    #[async_trait]
    impl RequestProcessor for Unavailable {
        async fn process(&self, _payload: &[u8]) -> Result<Vec<u8>, BoxedError> {
            Err("downstream dependency is gone".into())
        }
    }

    async fn responder<P: RequestProcessor>(transport: &MockTransport, processor: P) -> Responder<MockTransport, P> {
        let descriptor = SubscriptionDescriptor::new(COMMAND_TOPIC, "replyService", true, false);
        Responder::new(transport.clone(), descriptor, processor)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn answer_requests_end_to_end() {
        let transport = MockTransport::default();
        let invocations = Arc::new(AtomicUsize::new(0));
        let responder = responder(
            &transport,
            Shouter {
                invocations: invocations.clone(),
            },
        )
        .await;
        tokio::spawn(responder.run());

        let config = RequestorConfig::new("test");
        let requestor = InboxRequestor::new(transport, config).await.unwrap();

        let reply = requestor
            .request(COMMAND_TOPIC, b"shout", Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(reply, b"SHOUT!!!".to_vec());
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(requestor.in_flight(), 0);
    }

    #[tokio::test]
    async fn skip_replies_when_none_was_requested() {
        let transport = MockTransport::default();
        let invocations = Arc::new(AtomicUsize::new(0));
        let responder = responder(
            &transport,
            Shouter {
                invocations: invocations.clone(),
            },
        )
        .await;
        tokio::spawn(responder.run());

        // A bare event without any reply metadata
        let producer = transport.create_producer(COMMAND_TOPIC).await.unwrap();
        producer
            .send(b"fire and forget", MessageProperties::new())
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(transport.rejected_deliveries(), 0);
    }

    #[tokio::test]
    async fn hand_failed_requests_back_to_the_transport() {
        let transport = MockTransport::default();
        let responder = responder(&transport, Unavailable).await;
        tokio::spawn(responder.run());

        let producer = transport.create_producer(COMMAND_TOPIC).await.unwrap();
        producer
            .send(b"doomed", MessageProperties::new())
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;

        assert!(transport.rejected_deliveries() > 0);
    }
}
