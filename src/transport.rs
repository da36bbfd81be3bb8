//! The seams between the channel pool and the broker client stack.
//!
//! The pool itself never talks to RabbitMq directly: it opens channels through
//! a [`ConnectionSupplier`], probes liveness through a [`BrokerConnection`]
//! and closes/limits channels through a [`BrokerChannel`]. The production
//! implementations live in [`rabbit_mq`](crate::rabbit_mq) (backed by
//! [`lapin`]) and [`pool::ConnectionPool`](crate::pool::ConnectionPool)
//! (backed by [`deadpool`]); tests plug in scripted fakes.

use std::sync::Arc;

/// Error produced by the broker client stack underneath the pool.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct TransportError(#[from] anyhow::Error);

impl From<lapin::Error> for TransportError {
    fn from(err: lapin::Error) -> Self {
        Self(err.into())
    }
}

impl From<deadpool::managed::PoolError<TransportError>> for TransportError {
    fn from(err: deadpool::managed::PoolError<TransportError>) -> Self {
        match err {
            deadpool::managed::PoolError::Backend(e) => e,
            err => Self(err.into()),
        }
    }
}

/// A live channel on a broker connection.
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Close the channel on the broker.
    async fn close(&self) -> Result<(), TransportError>;

    /// Apply a prefetch limit to the channel.
    ///
    /// With `global` set, the limit covers the channel as a whole rather than
    /// each consumer on it.
    async fn set_qos(
        &self,
        prefetch_count: u16,
        prefetch_size: u32,
        global: bool,
    ) -> Result<(), TransportError>;
}

/// A connection to the broker, capable of hosting many channels.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    /// Whether the connection is no longer usable.
    ///
    /// Queried lazily on every call; the answer can change between checks.
    fn is_closed(&self) -> bool;

    /// Open a new channel multiplexed over this connection.
    async fn open_channel(&self) -> Result<Self::Channel, TransportError>;
}

/// Produces healthy, shareable broker connections on demand.
#[async_trait::async_trait]
pub trait ConnectionSupplier: Send + Sync + 'static {
    type Connection: BrokerConnection;

    /// Whether [`initialize`](ConnectionSupplier::initialize) has completed.
    fn is_initialized(&self) -> bool;

    /// Prepare the supplier for use.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Hand out a healthy connection.
    ///
    /// Connections are shared: many channels may be multiplexed over the same
    /// returned connection.
    async fn get_connection(&self) -> Result<Arc<Self::Connection>, TransportError>;

    /// Tear the supplier down, releasing its connections.
    async fn shutdown(&self);
}

// Suppliers are routinely shared between a pool and other owners.
#[async_trait::async_trait]
impl<S: ConnectionSupplier> ConnectionSupplier for Arc<S> {
    type Connection = S::Connection;

    fn is_initialized(&self) -> bool {
        (**self).is_initialized()
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        (**self).initialize().await
    }

    async fn get_connection(&self) -> Result<Arc<Self::Connection>, TransportError> {
        (**self).get_connection().await
    }

    async fn shutdown(&self) {
        (**self).shutdown().await
    }
}
