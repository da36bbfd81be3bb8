use crate::transport::TransportError;

/// Error returned to a caller borrowing from the pool.
#[derive(thiserror::Error, Debug)]
pub enum ChannelPoolError {
    /// The connection supplier could not hand out a usable connection.
    #[error("opening channel failed - could not get a connection")]
    ConnectionUnavailable(#[source] TransportError),
    /// A channel failed to open and the pool is configured to fail fast.
    #[error("opening channel failed")]
    ChannelOpenFailed(#[source] TransportError),
    /// Every configured attempt to open a channel failed.
    #[error("opening channel retries exhausted")]
    RetriesExhausted,
    /// The pool has not been initialized yet.
    #[error("can't get channel - channel pool has not been initialized")]
    PoolNotInitialized,
    /// The pool has been shut down.
    #[error("can't get channel - channel pool has been shutdown")]
    PoolShutDown,
}
