use crate::transport::{BrokerConnection, TransportError};
use std::sync::Arc;

/// One usable broker channel, bound to the connection it is multiplexed over.
///
/// Hosts are shared capabilities: the pool keeps one clone in circulation
/// while any number of borrowers hold others. Treat a borrowed host as good
/// for one logical operation rather than an owned resource.
pub struct ChannelHost<C: BrokerConnection> {
    id: u64,
    channel: Arc<C::Channel>,
    connection: Arc<C>,
}

// Derived `Clone` would demand `C: Clone`; every field is an `Arc` (or Copy).
impl<C: BrokerConnection> Clone for ChannelHost<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            channel: Arc::clone(&self.channel),
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<C: BrokerConnection> ChannelHost<C> {
    pub(crate) fn new(id: u64, channel: C::Channel, connection: Arc<C>) -> Self {
        Self {
            id,
            channel: Arc::new(channel),
            connection,
        }
    }

    /// The pool-unique identity of this host.
    ///
    /// Recreating a broken host produces a new value carrying the same id, so
    /// flag state keyed by id stays meaningful across replacements.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The live channel capability.
    pub fn channel(&self) -> &C::Channel {
        &self.channel
    }

    /// Whether the connection backing this channel has died.
    ///
    /// Queried against the connection on every call, never cached: the
    /// answer can change between checks.
    pub fn is_connection_closed(&self) -> bool {
        self.connection.is_closed()
    }

    pub(crate) async fn close(&self) -> Result<(), TransportError> {
        use crate::transport::BrokerChannel;
        self.channel.close().await
    }
}
