use crate::transport::MessageTransport;
use crate::BoxedError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Memoized publish handles, one per destination topic
///
/// Producers are expensive to set up but cheap to reuse and safe to share
/// across concurrent publishes, so they are created lazily on first use and
/// retained for the lifetime of the cache. There is no eviction, destinations
/// are expected to be a small, finite set of well-known topics that is reused
/// across calls.
pub struct DestinationCache<T: MessageTransport> {
    transport: Arc<T>,
    producers: Mutex<HashMap<String, Arc<T::Producer>>>,
}

impl<T> DestinationCache<T>
where
    T: MessageTransport,
{
    /// Creates an empty cache backed by the given transport
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            producers: Mutex::new(HashMap::new()),
        }
    }

    /// Retrieves the producer for a topic, creating it on first use
    ///
    /// Concurrent first-time calls for the same topic yield the same handle,
    /// the cache never creates more than one producer per topic. The interior
    /// lock is deliberately held across the creation call to provide that
    /// guarantee.
    pub async fn get_or_create(&self, topic: &str) -> Result<Arc<T::Producer>, BoxedError> {
        let mut producers = self.producers.lock().await;

        if let Some(producer) = producers.get(topic) {
            return Ok(producer.clone());
        }

        let producer = Arc::new(self.transport.create_producer(topic).await?);
        producers.insert(topic.to_owned(), producer.clone());

        Ok(producer)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::implementation::mock::MockTransport;
    use futures::future::join_all;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn reuse_existing_producers() {
        let transport = Arc::new(MockTransport::default());
        let cache = DestinationCache::new(transport.clone());

        cache.get_or_create("some.topic").await.unwrap();
        cache.get_or_create("some.topic").await.unwrap();

        assert_eq!(transport.created_producers(), 1);
    }

    #[tokio::test]
    async fn create_one_producer_per_topic() {
        let transport = Arc::new(MockTransport::default());
        let cache = DestinationCache::new(transport.clone());

        cache.get_or_create("first.topic").await.unwrap();
        cache.get_or_create("second.topic").await.unwrap();

        assert_eq!(transport.created_producers(), 2);
    }

    #[tokio::test]
    async fn survive_concurrent_first_use() {
        let transport = Arc::new(MockTransport::default());
        let cache = Arc::new(DestinationCache::new(transport.clone()));

        let lookups = (0..16).map(|_| {
            let cache = cache.clone();
            async move { cache.get_or_create("contested.topic").await.unwrap() }
        });
        join_all(lookups).await;

        assert_eq!(transport.created_producers(), 1);
    }
}
