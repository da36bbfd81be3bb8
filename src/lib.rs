//! `rabbit-warren` keeps a warm set of RabbitMQ channels, multiplexed over a
//! smaller number of underlying connections, and hands them out round-robin.
//!
//! Borrow a channel with [`ChannelPool::get_channel`](pool::ChannelPool::get_channel)
//! and use it for one logical operation; the pool detects channels whose
//! backing connection has died and transparently replaces them, so callers
//! never manage connection lifecycle themselves.
//!
//! ```rust
//! use rabbit_warren::configuration::{ChannelPoolSettings, RabbitMqSettings};
//! use rabbit_warren::pool::{ChannelPool, ConnectionPool};
//! use rabbit_warren::rabbit_mq::ConnectionFactory;
//!
//! // Function for asyncness.
//! async fn example() -> anyhow::Result<()> {
//!     // Broker connection details and pool sizing.
//!     let settings = RabbitMqSettings::default();
//!     let pool_settings = ChannelPoolSettings::default();
//!
//!     // Channels are multiplexed over a small set of shared connections.
//!     let supplier = ConnectionPool::builder(ConnectionFactory::new_from_config(&settings)?)
//!         .max_connections(5)
//!         .build();
//!
//!     let pool = ChannelPool::new(pool_settings, supplier);
//!     pool.initialize().await;
//!
//!     // Borrow a channel; it goes straight back into circulation.
//!     let host = pool.get_channel().await?;
//!     let _raw = host.channel().raw();
//!     Ok(())
//! }
//! ```

pub mod configuration;
pub mod pool;
pub mod rabbit_mq;
pub mod transport;
