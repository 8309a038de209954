use super::{RedisFactory, RedisProducer, RedisSubscription, STREAM_ID_TAIL};
use crate::transport::{MessageTransport, SubscriptionDescriptor};
use crate::BoxedError;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use uuid::Uuid;

/// [`MessageTransport`] implementation on top of Redis Streams
///
/// Each subscription name becomes a consumer group on the topic's stream.
/// Shared subscriptions attach each consumer under a unique name so the group
/// balances entries between them; exclusive subscriptions reuse the
/// subscription name as the consumer name, a stable identity redis does not
/// enforce but which keeps the pending entries list attributable. Non-durable
/// subscriptions tear down whatever group state a previous incarnation left
/// behind and restart at the tail of the stream.
pub struct RedisTransport<F: RedisFactory> {
    factory: Arc<F>,
}

impl<F: RedisFactory> RedisTransport<F> {
    /// Creates a new instance from a given [`RedisFactory`]
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }
}

#[async_trait]
impl<F> MessageTransport for RedisTransport<F>
where
    F: RedisFactory + Send + Sync + 'static,
{
    type Producer = RedisProducer<F>;
    type Subscription = RedisSubscription<F>;

    async fn create_producer(&self, topic: &str) -> Result<Self::Producer, BoxedError> {
        Ok(RedisProducer::new(self.factory.clone(), topic.to_owned()))
    }

    async fn subscribe(
        &self,
        descriptor: SubscriptionDescriptor,
    ) -> Result<Self::Subscription, BoxedError> {
        let mut con = self.factory.owned_connection().await?;

        if !descriptor.durable() {
            con.xgroup_destroy::<_, _, ()>(descriptor.topic(), descriptor.name())
                .await
                .ok();
        }

        // Joins the group if it already exists (durable resubscription)
        con.xgroup_create_mkstream::<_, _, _, ()>(
            descriptor.topic(),
            descriptor.name(),
            STREAM_ID_TAIL,
        )
        .await
        .ok();

        let consumer = if descriptor.exclusive() {
            descriptor.name().to_owned()
        } else {
            format!("{}.{}", descriptor.name(), Uuid::new_v4().to_simple())
        };

        Ok(RedisSubscription::new(
            self.factory.clone(),
            con,
            descriptor.topic().to_owned(),
            descriptor.name().to_owned(),
            consumer,
        ))
    }
}
