use crate::BoxedError;
use async_trait::async_trait;
use redis::aio::{Connection, ConnectionLike, MultiplexedConnection};
use tokio::sync::Mutex;

/// Factory for redis connections
///
/// Two kinds of connections are handed out: owned ones for long-running,
/// blocking commands that would disturb other users on a shared connection,
/// and shared ones for short commands where establishing a dedicated
/// connection per user would be wasteful.
#[async_trait]
pub trait RedisFactory {
    /// Connection type for long-running, blocking commands
    type Owned: ConnectionLike + Send + 'static;
    /// Connection type shared between many short-lived users
    type Shared: ConnectionLike + Send + 'static;

    /// Establishes a new connection owned exclusively by the caller
    async fn owned_connection(&self) -> Result<Self::Owned, BoxedError>;

    /// Retrieves a handle to a connection shared with other users
    ///
    /// Blocking commands must not be issued on it.
    async fn shared_connection(&self) -> Result<Self::Shared, BoxedError>;
}

/// [`RedisFactory`] backed by a [`redis::Client`]
///
/// Owned connections are established on demand, the multiplexed connection is
/// created on first use and shared by cloning afterwards.
pub struct ClientFactory {
    client: redis::Client,
    multiplexed: Mutex<Option<MultiplexedConnection>>,
}

impl ClientFactory {
    /// Creates a new instance from an existing client
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            multiplexed: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RedisFactory for ClientFactory {
    type Owned = Connection;
    type Shared = MultiplexedConnection;

    async fn owned_connection(&self) -> Result<Self::Owned, BoxedError> {
        Ok(self.client.get_async_connection().await?)
    }

    async fn shared_connection(&self) -> Result<Self::Shared, BoxedError> {
        let mut shared = self.multiplexed.lock().await;

        let connection = match shared.as_ref() {
            Some(connection) => connection.clone(),
            None => {
                let connection = self.client.get_multiplexed_tokio_connection().await?;
                *shared = Some(connection.clone());
                connection
            }
        };

        Ok(connection)
    }
}
