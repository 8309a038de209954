use super::{CorrelationTable, SOURCE_REQUEST_ID_PROPERTY};
use crate::transport::{Delivery, Subscription};
use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Distributes incoming replies to their waiting callers
///
/// Runs until the subscription fails, which usually means the connection to
/// the broker is gone for good. The loop itself never terminates because of a
/// single bad message — a reply without a correlation token is handed back to
/// the transport for redelivery while a reply nobody waits for anymore is
/// acknowledged and dropped (redelivering it cannot resurrect its waiter).
///
/// The `online` flag is lowered right before the loop exits so that new
/// requests can fail fast instead of idling until their deadline.
pub(crate) async fn deliver_replies<S: Subscription>(
    mut subscription: S,
    table: CorrelationTable,
    online: Arc<AtomicBool>,
) {
    loop {
        let mut delivery = match subscription.receive().await {
            Ok(delivery) => delivery,
            Err(e) => {
                error!("Reply subscription failed, no further replies will be received: {}", e);
                break;
            }
        };

        match delivery.property(SOURCE_REQUEST_ID_PROPERTY).map(str::to_owned) {
            Some(token) => {
                let payload = delivery.payload().to_vec();

                if !table.resolve(&token, payload) {
                    // Duplicate or the waiter timed out, either way nobody is
                    // listening anymore and redelivery would just wedge the
                    // subscription.
                    debug!("Discarding reply for unknown request {}", token);
                }

                if let Err(e) = delivery.acknowledge().await {
                    warn!("Failed to acknowledge reply for request {}: {}", token, e);
                }
            }
            None => {
                warn!("Received reply without a correlation token, requesting redelivery");

                if let Err(e) = delivery.reject().await {
                    warn!("Failed to reject uncorrelated reply: {}", e);
                }
            }
        }
    }

    online.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::implementation::mock::MockTransport;
    use crate::transport::{MessageTransport, Producer, SubscriptionDescriptor};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::sleep;

    const INBOX: &str = "test.inbox";

    async fn listening_table(transport: &MockTransport) -> (CorrelationTable, Arc<AtomicBool>) {
        let descriptor = SubscriptionDescriptor::new(INBOX, "test.inbox", false, true);
        let subscription = transport.subscribe(descriptor).await.unwrap();
        let table = CorrelationTable::new();
        let online = Arc::new(AtomicBool::new(true));

        tokio::spawn(deliver_replies(subscription, table.clone(), online.clone()));

        (table, online)
    }

    async fn publish_reply(transport: &MockTransport, token: Option<&str>, payload: &[u8]) {
        let producer = transport.create_producer(INBOX).await.unwrap();
        let mut properties = HashMap::new();

        if let Some(token) = token {
            properties.insert(SOURCE_REQUEST_ID_PROPERTY.to_owned(), token.to_owned());
        }

        producer.send(payload, properties).await.unwrap();
    }

    #[tokio::test]
    async fn route_replies_to_their_waiter() {
        let transport = MockTransport::default();
        let (table, _) = listening_table(&transport).await;

        let pending = table.register("1".into()).unwrap();
        publish_reply(&transport, Some("1"), b"reply").await;

        let payload = pending.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(payload, b"reply".to_vec());
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn survive_orphan_replies() {
        let transport = MockTransport::default();
        let (table, _) = listening_table(&transport).await;

        let pending = table.register("1".into()).unwrap();
        publish_reply(&transport, Some("ghost"), b"orphan").await;

        sleep(Duration::from_millis(50)).await;
        assert_eq!(table.len(), 1);

        publish_reply(&transport, Some("1"), b"legitimate").await;
        let payload = pending.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(payload, b"legitimate".to_vec());
    }

    #[tokio::test]
    async fn reject_replies_without_a_token() {
        let transport = MockTransport::default();
        let (table, _) = listening_table(&transport).await;

        let pending = table.register("1".into()).unwrap();
        publish_reply(&transport, None, b"malformed").await;

        sleep(Duration::from_millis(50)).await;
        assert!(transport.rejected_deliveries() > 0);

        publish_reply(&transport, Some("1"), b"legitimate").await;
        let payload = pending.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(payload, b"legitimate".to_vec());
    }

    #[tokio::test]
    async fn go_offline_when_the_subscription_dies() {
        let transport = MockTransport::default();
        let (_table, online) = listening_table(&transport).await;

        transport.shutdown();
        sleep(Duration::from_millis(50)).await;

        assert!(!online.load(Ordering::SeqCst));
    }
}
