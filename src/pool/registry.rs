use crate::pool::host::ChannelHost;
use crate::transport::BrokerConnection;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The circulating multiset of ready-to-use channel hosts.
///
/// A multi-producer/multi-consumer queue: [`take`](Registry::take) suspends
/// the calling task until a host is available, [`put`](Registry::put) never
/// blocks. The target capacity is the configured channel count; occupancy
/// never exceeds it because every borrow re-enqueues exactly what it dequeued.
pub(crate) struct Registry<C: BrokerConnection> {
    tx: async_channel::Sender<ChannelHost<C>>,
    rx: async_channel::Receiver<ChannelHost<C>>,
}

impl<C: BrokerConnection> Clone for Registry<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<C: BrokerConnection> Registry<C> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    /// Dequeue one host, suspending while the registry is empty.
    ///
    /// Returns `None` once the registry has been closed and drained.
    pub(crate) async fn take(&self) -> Option<ChannelHost<C>> {
        self.rx.recv().await.ok()
    }

    /// Dequeue one host without suspending.
    pub(crate) fn try_take(&self) -> Option<ChannelHost<C>> {
        self.rx.try_recv().ok()
    }

    /// Enqueue a host at the tail.
    ///
    /// A put into a closed registry is a no-op: the host was torn down
    /// underneath us and is simply dropped.
    pub(crate) fn put(&self, host: ChannelHost<C>) {
        let _ = self.tx.try_send(host);
    }

    /// Close the registry, waking every suspended [`take`](Registry::take).
    ///
    /// Hosts already enqueued remain drainable via
    /// [`try_take`](Registry::try_take).
    pub(crate) fn close(&self) {
        self.tx.close();
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}

/// Channels marked as known-bad, keyed by host id.
///
/// Flagging does not evict the host from the registry; staleness is resolved
/// lazily on the next borrow, which keeps flagging O(1) instead of an O(n)
/// queue scan.
#[derive(Default)]
pub(crate) struct FlagTable {
    flagged: Mutex<HashMap<u64, bool>>,
}

impl FlagTable {
    /// Mark the channel as unusable: its next borrow recreates it.
    pub(crate) fn flag(&self, channel_id: u64) {
        self.flagged.lock().insert(channel_id, true);
    }

    /// Mark the channel as usable again.
    ///
    /// Entries are kept with a `false` value rather than removed.
    pub(crate) fn unflag(&self, channel_id: u64) {
        self.flagged.lock().insert(channel_id, false);
    }

    pub(crate) fn is_flagged(&self, channel_id: u64) -> bool {
        self.flagged
            .lock()
            .get(&channel_id)
            .copied()
            .unwrap_or(false)
    }

    pub(crate) fn reset(&self) {
        self.flagged.lock().clear();
    }
}
