use super::{
    RedisFactory, WireMessage, REDELIVERY_LIMIT, STREAM_ID_ADDITIONS, STREAM_ID_HEAD,
    STREAM_ID_NEW, STREAM_PAYLOAD_KEY,
};
use crate::transport::{Delivery, Subscription};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use log::warn;
use redis::aio::ConnectionLike;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::sync::Arc;

/// [`Subscription`] implementation reading a stream through a consumer group
///
/// Entries that were delivered but never acknowledged by a previous
/// incarnation of the same consumer are drained from the pending entries list
/// before the subscription starts blocking on new additions with
/// [`XREADGROUP`](https://redis.io/commands/xreadgroup).
pub struct RedisSubscription<F: RedisFactory> {
    factory: Arc<F>,
    con: F::Owned,
    key: String,
    group: String,
    consumer: String,
    next_id: String,
}

impl<F: RedisFactory> RedisSubscription<F> {
    pub(super) fn new(
        factory: Arc<F>,
        con: F::Owned,
        key: String,
        group: String,
        consumer: String,
    ) -> Self {
        Self {
            factory,
            con,
            key,
            group,
            consumer,
            next_id: STREAM_ID_HEAD.to_owned(),
        }
    }
}

#[async_trait]
impl<F> Subscription for RedisSubscription<F>
where
    F: RedisFactory + Send + Sync,
{
    type Entry = RedisDelivery<F::Shared>;

    async fn receive(&mut self) -> Result<Self::Entry, BoxedError> {
        loop {
            let draining = self.next_id != STREAM_ID_ADDITIONS;

            let mut options = StreamReadOptions::default()
                .group(&self.group, &self.consumer)
                .count(1);

            if !draining {
                // BLOCK 0 waits indefinitely for the next addition
                options = options.block(0);
            }

            let mut reply = self
                .con
                .xread_options::<_, _, StreamReadReply>(
                    &[self.key.as_str()],
                    &[self.next_id.as_str()],
                    &options,
                )
                .await?;

            let entries = reply.keys.pop().map(|stream| stream.ids).unwrap_or_default();

            if draining {
                match entries.last() {
                    // Continue after the drained entry next time around
                    Some(entry) => self.next_id = entry.id.clone(),
                    // Pending entries exhausted, move over to new additions
                    None => {
                        self.next_id = STREAM_ID_ADDITIONS.to_owned();
                        continue;
                    }
                }
            }

            let entry = match entries.into_iter().next() {
                Some(entry) => entry,
                None => continue,
            };

            match WireMessage::from_entry(&entry) {
                Ok(message) => {
                    let ack_con = self.factory.shared_connection().await?;

                    return Ok(RedisDelivery {
                        con: ack_con,
                        key: self.key.clone(),
                        group: self.group.clone(),
                        id: entry.id,
                        message,
                    });
                }
                Err(e) => {
                    // Left unacknowledged in the pending entries list, a
                    // later incarnation of this consumer will encounter it
                    // again during its drain.
                    warn!("Skipping undecodable entry {} on {}: {}", entry.id, self.key, e);
                    continue;
                }
            }
        }
    }
}

/// Message handed out by a [`RedisSubscription`]
pub struct RedisDelivery<C: ConnectionLike + Send> {
    con: C,
    key: String,
    group: String,
    id: String,
    message: WireMessage,
}

#[async_trait]
impl<C> Delivery for RedisDelivery<C>
where
    C: ConnectionLike + Send,
{
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn property(&self, key: &str) -> Option<&str> {
        self.message.properties.get(key).map(String::as_str)
    }

    async fn acknowledge(&mut self) -> EmptyResult {
        self.con
            .xack::<_, _, _, ()>(&self.key, &self.group, &[&self.id])
            .await?;

        Ok(())
    }

    async fn reject(&mut self) -> EmptyResult {
        if self.message.redeliveries >= REDELIVERY_LIMIT {
            warn!(
                "Dropping entry {} on {} after {} redeliveries",
                self.id, self.key, REDELIVERY_LIMIT
            );
        } else {
            let message = WireMessage {
                payload: self.message.payload.clone(),
                properties: self.message.properties.clone(),
                redeliveries: self.message.redeliveries + 1,
            };
            let data = message.encode()?;

            self.con
                .xadd::<_, _, _, _, ()>(&self.key, STREAM_ID_NEW, &[(STREAM_PAYLOAD_KEY, &data)])
                .await?;
        }

        // The original entry is acknowledged either way, its replacement (if
        // any) is a fresh entry as far as the broker is concerned.
        self.con
            .xack::<_, _, _, ()>(&self.key, &self.group, &[&self.id])
            .await?;

        Ok(())
    }
}
