use super::{RedisFactory, WireMessage, STREAM_ID_NEW, STREAM_PAYLOAD_KEY};
use crate::transport::{MessageProperties, Producer};
use crate::EmptyResult;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;

/// [`Producer`] implementation appending to a stream with [`XADD`](https://redis.io/commands/xadd)
///
/// Sending resolves once the command has been accepted by the connection,
/// making the publish fire-and-forget from the caller's point of view.
pub struct RedisProducer<F: RedisFactory> {
    factory: Arc<F>,
    key: String,
}

impl<F: RedisFactory> RedisProducer<F> {
    pub(super) fn new(factory: Arc<F>, key: String) -> Self {
        Self { factory, key }
    }
}

#[async_trait]
impl<F> Producer for RedisProducer<F>
where
    F: RedisFactory + Send + Sync,
{
    async fn send(&self, payload: &[u8], properties: MessageProperties) -> EmptyResult {
        let message = WireMessage {
            payload: payload.to_vec(),
            properties,
            redeliveries: 0,
        };
        let data = message.encode()?;

        let mut con = self.factory.shared_connection().await?;

        con.xadd::<_, _, _, _, ()>(&self.key, STREAM_ID_NEW, &[(STREAM_PAYLOAD_KEY, &data)])
            .await?;

        Ok(())
    }
}
