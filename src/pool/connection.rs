//! The production [`ConnectionSupplier`]: a [`deadpool`]-managed set of
//! shared connections.
//!
//! Connections are handed out as `Arc` clones of pooled objects, so many
//! channels end up multiplexed over the same few underlying connections.

use crate::rabbit_mq::{Connection, ConnectionFactory};
use crate::transport::{ConnectionSupplier, TransportError};
use deadpool::managed::{self, Manager, RecycleError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Standard connection pool size.
const MAX_CONNECTION_POOL_SIZE: usize = 10;

#[async_trait::async_trait]
impl Manager for ConnectionFactory {
    type Type = Arc<Connection>;
    type Error = TransportError;

    async fn create(&self) -> Result<Arc<Connection>, TransportError> {
        Ok(Arc::new(self.new_connection().await?))
    }

    async fn recycle(&self, obj: &mut Arc<Connection>) -> managed::RecycleResult<TransportError> {
        if obj.is_closed() {
            Err(RecycleError::Message(
                "Connection is not in an healthy state".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Builds a [`ConnectionPool`].
pub struct ConnectionPoolBuilder {
    connection_factory: ConnectionFactory,
    max_n_connections: usize,
}

impl ConnectionPoolBuilder {
    /// Change the roof for how many connections will be pooled internally.
    ///
    /// Default: 10.
    #[must_use]
    pub fn max_connections(self, max_n_connections: usize) -> Self {
        Self {
            max_n_connections,
            ..self
        }
    }

    /// Finalize the builder to create a [`ConnectionPool`].
    pub fn build(self) -> ConnectionPool {
        let pool = managed::Pool::builder(self.connection_factory)
            .max_size(self.max_n_connections)
            .build()
            .expect("could not build connection pool. This is a bug with rabbit-warren");
        ConnectionPool {
            pool,
            initialized: AtomicBool::new(false),
        }
    }
}

/// A pool of shared connections to the RabbitMq broker.
///
/// Channels are multiplexed over these connections: handing out a connection
/// clones the shared handle, it never removes the connection from the pool.
pub struct ConnectionPool {
    pool: managed::Pool<ConnectionFactory>,
    initialized: AtomicBool,
}

impl ConnectionPool {
    /// Create a [`ConnectionPool`] builder from a [`ConnectionFactory`].
    pub fn builder(connection_factory: ConnectionFactory) -> ConnectionPoolBuilder {
        ConnectionPoolBuilder {
            connection_factory,
            max_n_connections: MAX_CONNECTION_POOL_SIZE,
        }
    }
}

#[async_trait::async_trait]
impl ConnectionSupplier for ConnectionPool {
    type Connection = Connection;

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Dial one connection up-front so a misconfigured broker address
    /// surfaces at startup rather than on the first borrow.
    async fn initialize(&self) -> Result<(), TransportError> {
        let _probe = self.pool.get().await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn get_connection(&self) -> Result<Arc<Connection>, TransportError> {
        let conn = self.pool.get().await?;
        // Clone the shared handle out of the pool object; dropping the object
        // returns the connection slot to the pool immediately.
        Ok(Arc::clone(&*conn))
    }

    async fn shutdown(&self) {
        self.pool.close();
        self.initialized.store(false, Ordering::Release);
    }
}
