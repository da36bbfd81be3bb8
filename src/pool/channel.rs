//! The pool controller: owns the circulating registry of channel hosts and
//! keeps it healthy.

use crate::configuration::ChannelPoolSettings;
use crate::pool::error::ChannelPoolError;
use crate::pool::host::ChannelHost;
use crate::pool::registry::{FlagTable, Registry};
use crate::transport::ConnectionSupplier;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Background errors buffered beyond this are dropped.
const ERROR_SINK_CAPACITY: usize = 10;

/// Initialization stops early once this many creations have failed.
const MAX_INITIALIZE_ERRORS: usize = 5;

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// `ChannelPool` keeps a fixed-size set of RabbitMq channels in round-robin
/// circulation, multiplexed over the connections handed out by its
/// [`ConnectionSupplier`].
///
/// Borrowing a channel re-enqueues it immediately, so a [`ChannelHost`] is a
/// shared capability rather than an exclusively leased resource. A borrow
/// whose backing connection has died, or whose id has been
/// [flagged](ChannelPool::flag_channel), is transparently recreated under the
/// same id before being handed out.
///
/// Failures in background work (initialization retries, shutdown closes)
/// never surface to borrowers; they are buffered on a bounded error sink
/// drainable through [`errors`](ChannelPool::errors).
pub struct ChannelPool<S: ConnectionSupplier> {
    settings: ChannelPoolSettings,
    supplier: S,
    registry: RwLock<Registry<S::Connection>>,
    flags: FlagTable,
    errors_tx: async_channel::Sender<anyhow::Error>,
    errors_rx: async_channel::Receiver<anyhow::Error>,
    initialized: AtomicBool,
    /// Monotonic creation counter; its current value is the next host id.
    created_channels: AtomicU64,
    /// Shutdown gate. Checked lock-free on every borrow so that borrowers
    /// fail fast without contending on `lifecycle_lock`.
    shutting_down: AtomicBool,
    /// Serializes `initialize` and `shutdown`; held across awaits.
    lifecycle_lock: tokio::sync::Mutex<()>,
    retry_backoff: Duration,
}

impl<S: ConnectionSupplier> ChannelPool<S> {
    /// Create an uninitialized pool on top of a connection supplier.
    ///
    /// No channels are opened until [`initialize`](ChannelPool::initialize)
    /// is called.
    pub fn new(settings: ChannelPoolSettings, supplier: S) -> Self {
        let (errors_tx, errors_rx) = async_channel::bounded(ERROR_SINK_CAPACITY);
        Self {
            settings,
            supplier,
            registry: RwLock::new(Registry::new()),
            flags: FlagTable::default(),
            errors_tx,
            errors_rx,
            initialized: AtomicBool::new(false),
            created_channels: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            lifecycle_lock: tokio::sync::Mutex::new(()),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Change the pause between channel creation attempts.
    ///
    /// Default: 50ms.
    #[must_use]
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Populate the pool up to the configured channel count.
    ///
    /// Idempotent and safe to call concurrently: the first caller does the
    /// work, concurrent callers block until it completes, later calls are
    /// no-ops. The connection supplier is initialized first if it has not
    /// been already.
    ///
    /// Creation failures do not fail initialization: they are routed to the
    /// error sink and retried after a backoff, until either the pool is full,
    /// [`break_on_error`](ChannelPoolSettings::break_on_error) trips, or the
    /// error ceiling is reached. A pool that stops early simply serves fewer
    /// channels, observable via [`channel_count`](ChannelPool::channel_count).
    #[tracing::instrument(name = "channel_pool_initialize", skip(self))]
    pub async fn initialize(&self) {
        let _guard = self.lifecycle_lock.lock().await;

        if !self.supplier.is_initialized() {
            if let Err(err) = self.supplier.initialize().await {
                warn!(error = %err, "connection supplier initialization failed");
                self.emit_error(err.into());
            }
        }

        if !self.initialized.load(Ordering::SeqCst) {
            self.populate().await;
            self.initialized.store(true, Ordering::SeqCst);
        }

        // Lower the gate left up by a previous shutdown.
        self.shutting_down.store(false, Ordering::SeqCst);
    }

    async fn populate(&self) {
        let registry = self.registry.read().clone();
        let mut error_count = 0usize;

        while (self.created_channels.load(Ordering::SeqCst) as i64) < self.settings.channel_count {
            let id = self.created_channels.load(Ordering::SeqCst);
            match self.create_channel_host(id).await {
                Ok(host) => {
                    self.created_channels.fetch_add(1, Ordering::SeqCst);
                    registry.put(host);
                }
                Err(err) => {
                    warn!(channel_id = id, error = %err, "failed to create pooled channel");
                    self.emit_error(err.into());
                    error_count += 1;

                    if self.settings.break_on_error || error_count >= MAX_INITIALIZE_ERRORS {
                        break;
                    }

                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }

    /// Open one channel and wrap it as a [`ChannelHost`] under `id`.
    async fn create_channel_host(
        &self,
        id: u64,
    ) -> Result<ChannelHost<S::Connection>, ChannelPoolError> {
        use crate::transport::{BrokerChannel, BrokerConnection};

        let connection = self
            .supplier
            .get_connection()
            .await
            .map_err(ChannelPoolError::ConnectionUnavailable)?;

        let mut channel = None;
        for _ in 0..=self.settings.channel_retry_count {
            match connection.open_channel().await {
                Ok(opened) => {
                    channel = Some(opened);
                    break;
                }
                Err(err) => {
                    if self.settings.break_on_error {
                        return Err(ChannelPoolError::ChannelOpenFailed(err));
                    }

                    warn!(channel_id = id, error = %err, "failed to open channel, retrying");
                    self.emit_error(err.into());
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
        let channel = channel.ok_or(ChannelPoolError::RetriesExhausted)?;

        if self.settings.global_qos_count != 0 && self.settings.global_qos_size != 0 {
            // Best-effort: a channel that cannot take the prefetch limit is
            // still a usable channel.
            if let Err(err) = channel
                .set_qos(
                    self.settings.global_qos_count,
                    self.settings.global_qos_size,
                    true,
                )
                .await
            {
                warn!(channel_id = id, error = %err, "failed to apply global qos to channel");
                self.emit_error(err.into());
            }
        }

        Ok(ChannelHost::new(id, channel, connection))
    }

    /// Borrow a channel host from the pool.
    ///
    /// Suspends while the registry is empty. The host is validated before it
    /// is handed out: a dead backing connection or a flagged id triggers a
    /// synchronous recreation under the same id, and a recreation failure is
    /// the one lending path that surfaces an error to the caller.
    ///
    /// The (possibly recreated) host goes back to the tail of the registry
    /// before this returns, so repeated borrows cycle through the full set.
    pub async fn get_channel(&self) -> Result<ChannelHost<S::Connection>, ChannelPoolError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ChannelPoolError::PoolShutDown);
        }

        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ChannelPoolError::PoolNotInitialized);
        }

        let registry = self.registry.read().clone();

        // Pauses here while the registry is empty. A registry torn down
        // mid-wait wakes us with nothing.
        let mut host = registry
            .take()
            .await
            .ok_or(ChannelPoolError::PoolShutDown)?;

        if host.is_connection_closed() || self.flags.is_flagged(host.id()) {
            debug!(channel_id = host.id(), "replacing stale pooled channel");
            host = self.create_channel_host(host.id()).await?;
            self.flags.unflag(host.id());
        }

        // Back in the queue while a clone goes to the caller: round robin
        // over the channels and their connections.
        registry.put(host.clone());

        Ok(host)
    }

    /// How many channels are currently queued in the registry.
    pub fn channel_count(&self) -> i64 {
        self.registry.read().len() as i64
    }

    /// Mark the channel as unusable; its next borrow recreates it.
    pub fn flag_channel(&self, channel_id: u64) {
        self.flags.flag(channel_id);
    }

    /// Mark the channel as usable again.
    pub fn unflag_channel(&self, channel_id: u64) {
        self.flags.unflag(channel_id);
    }

    /// Whether the channel is currently marked for recreation.
    pub fn is_channel_flagged(&self, channel_id: u64) -> bool {
        self.flags.is_flagged(channel_id)
    }

    /// Background errors the pool swallowed on the caller's behalf.
    ///
    /// The sink is bounded and lossy under pressure: producers never block,
    /// and errors beyond its capacity are dropped. The receiver is clonable
    /// and receive-only.
    pub fn errors(&self) -> async_channel::Receiver<anyhow::Error> {
        self.errors_rx.clone()
    }

    /// Discard everything currently buffered on the error sink.
    ///
    /// Does not block when the sink is empty.
    pub fn flush_errors(&self) {
        while self.errors_rx.try_recv().is_ok() {}
    }

    /// Close every pooled channel and reset the pool to uninitialized.
    ///
    /// New borrows fail with [`ChannelPoolError::PoolShutDown`] from the
    /// moment the gate goes up until the next
    /// [`initialize`](ChannelPool::initialize); borrows suspended on an empty
    /// registry are woken and fail the same way. Hosts currently in a
    /// caller's hands are not waited for. Close failures are routed to the
    /// error sink and never abort the drain.
    #[tracing::instrument(name = "channel_pool_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle_lock.lock().await;
        self.shutting_down.store(true, Ordering::SeqCst);

        if self.initialized.load(Ordering::SeqCst) {
            let drained = {
                let mut registry = self.registry.write();
                std::mem::replace(&mut *registry, Registry::new())
            };
            // Wake suspended takers; what is already queued stays drainable.
            drained.close();

            while let Some(host) = drained.try_take() {
                if let Err(err) = host.close().await {
                    warn!(channel_id = host.id(), error = %err, "failed to close pooled channel");
                    self.emit_error(err.into());
                }
            }

            self.flags.reset();
            self.created_channels.store(0, Ordering::SeqCst);
            self.initialized.store(false, Ordering::SeqCst);

            self.supplier.shutdown().await;
        }
    }

    /// Non-blocking: a full sink drops the error rather than stalling the
    /// emitting operation.
    fn emit_error(&self, error: anyhow::Error) {
        let _ = self.errors_tx.try_send(error);
    }
}
