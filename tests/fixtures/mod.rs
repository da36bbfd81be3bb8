//! Scriptable in-memory transport used by the pool tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rabbit_warren::configuration::ChannelPoolSettings;
use rabbit_warren::transport::{
    BrokerChannel, BrokerConnection, ConnectionSupplier, TransportError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Observable state of one mock channel, shared with the test body.
#[derive(Default)]
pub struct ChannelState {
    pub closed: AtomicBool,
    pub qos: Mutex<Option<(u16, u32, bool)>>,
}

pub struct MockChannel {
    state: Arc<ChannelState>,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn close(&self) -> Result<(), TransportError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn set_qos(
        &self,
        prefetch_count: u16,
        prefetch_size: u32,
        global: bool,
    ) -> Result<(), TransportError> {
        *self.state.qos.lock() = Some((prefetch_count, prefetch_size, global));
        Ok(())
    }
}

pub struct MockConnection {
    closed: AtomicBool,
    failing_opens: AtomicUsize,
    pub channels: Mutex<Vec<Arc<ChannelState>>>,
}

impl MockConnection {
    fn new(failing_opens: usize) -> Self {
        Self {
            closed: AtomicBool::new(false),
            failing_opens: AtomicUsize::new(failing_opens),
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the broker dropping this connection.
    pub fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerConnection for MockConnection {
    type Channel = MockChannel;

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn open_channel(&self) -> Result<MockChannel, TransportError> {
        if self.failing_opens.load(Ordering::SeqCst) > 0 {
            self.failing_opens.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("broker refused to open a channel").into());
        }

        let state = Arc::new(ChannelState::default());
        self.channels.lock().push(Arc::clone(&state));
        Ok(MockChannel { state })
    }
}

/// A connection supplier with scriptable failures.
///
/// Every successful acquisition hands out a fresh healthy connection and
/// records it for later inspection.
#[derive(Default)]
pub struct MockSupplier {
    initialized: AtomicBool,
    pub acquisitions: AtomicUsize,
    pub shutdowns: AtomicUsize,
    acquisition_failures: Mutex<VecDeque<bool>>,
    opens_failing_per_connection: AtomicUsize,
    pub connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockSupplier {
    /// Script upcoming `get_connection` outcomes: `true` fails that call.
    /// Calls beyond the end of the script succeed.
    pub fn script_acquisition_failures(&self, script: &[bool]) {
        *self.acquisition_failures.lock() = script.iter().copied().collect();
    }

    /// Every connection handed out from now on refuses its first `n`
    /// channel opens.
    pub fn fail_opens_per_connection(&self, n: usize) {
        self.opens_failing_per_connection.store(n, Ordering::SeqCst);
    }

    pub fn connection(&self, index: usize) -> Arc<MockConnection> {
        Arc::clone(&self.connections.lock()[index])
    }

    /// Channel states across every connection, in creation order.
    pub fn channel_states(&self) -> Vec<Arc<ChannelState>> {
        self.connections
            .lock()
            .iter()
            .flat_map(|connection| connection.channels.lock().clone())
            .collect()
    }
}

#[async_trait]
impl ConnectionSupplier for MockSupplier {
    type Connection = MockConnection;

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_connection(&self) -> Result<Arc<MockConnection>, TransportError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let fail = self.acquisition_failures.lock().pop_front().unwrap_or(false);
        if fail {
            return Err(anyhow::anyhow!("no connection available").into());
        }

        let connection = Arc::new(MockConnection::new(
            self.opens_failing_per_connection.load(Ordering::SeqCst),
        ));
        self.connections.lock().push(Arc::clone(&connection));
        Ok(connection)
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
    }
}

/// Pool settings with no open retries, for deterministic call counts.
pub fn pool_settings(channel_count: i64) -> ChannelPoolSettings {
    ChannelPoolSettings {
        channel_count,
        channel_retry_count: 0,
        break_on_error: false,
        global_qos_count: 0,
        global_qos_size: 0,
    }
}
