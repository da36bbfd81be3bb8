//! Provides a self-healing pool of RabbitMq channels multiplexed over a
//! shared set of connections.
//!
//! This module provides two key guarantees:
//! - Disposing of channels on broken connections and recreating new ones on-demand.
//! - Reusing connection objects across channels to limit overhead.
//!
//! Channels circulate round-robin: every borrow puts the channel straight
//! back at the tail of the pool, so a borrowed [`ChannelHost`] is a shared
//! capability good for one logical operation, not an exclusively owned
//! resource.
//!
//! ```rust
//! use rabbit_warren::configuration::{ChannelPoolSettings, RabbitMqSettings};
//! use rabbit_warren::pool::{ChannelPool, ConnectionPool};
//! use rabbit_warren::rabbit_mq::ConnectionFactory;
//!
//! // Function for asyncness.
//! async fn example() -> anyhow::Result<()> {
//!     // initialize rabbitmq connection details and config.
//!     let settings = RabbitMqSettings::default();
//!
//!     // determine the maximum underlying connections.
//!     let supplier = ConnectionPool::builder(ConnectionFactory::new_from_config(&settings)?)
//!         .max_connections(5)
//!         .build();
//!
//!     let pool = ChannelPool::new(ChannelPoolSettings::default(), supplier);
//!     pool.initialize().await;
//!
//!     // get a Channel from the pool.
//!     let host = pool.get_channel().await?;
//!     Ok(())
//! }
//! ```

mod channel;
mod connection;
mod error;
mod host;
mod registry;

pub use channel::ChannelPool;
pub use connection::{ConnectionPool, ConnectionPoolBuilder};
pub use error::ChannelPoolError;
pub use host::ChannelHost;
