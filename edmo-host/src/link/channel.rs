//! The channel capability: a duplex byte pipe with observable status.
//!
//! Channels are constructed as a (handle, driver) pair. The handle is what
//! the rest of the stack sees: status, fire-and-forget writes, the inbound
//! chunk queue, close. The driver is held by the transport task that owns
//! the underlying I/O (or by a test double) and feeds the same endpoints
//! from the other side.
//!
//! Inbound delivery is serialized per channel by construction: the chunk
//! queue has exactly one consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use edmo_types::LinkStatus;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier.
pub type ChannelId = u64;

/// Consumer-side handle of a channel.
pub struct Channel {
    id: ChannelId,
    name: String,
    status_rx: watch::Receiver<LinkStatus>,
    write_tx: mpsc::UnboundedSender<Bytes>,
    data_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    cancel: CancellationToken,
}

/// Transport-side endpoints of a channel.
pub struct ChannelDriver {
    /// Status publisher; use [`advance_status`] to keep transitions monotonic.
    pub status: watch::Sender<LinkStatus>,
    /// Inbound chunk queue feeding the handle's consumer.
    pub data: mpsc::UnboundedSender<Bytes>,
    /// Outbound writes enqueued through the handle.
    pub writes: mpsc::UnboundedReceiver<Bytes>,
    /// Cancelled when the handle is closed.
    pub cancel: CancellationToken,
}

impl Channel {
    /// Create a channel handle and its transport driver.
    pub fn pair(name: impl Into<String>, initial: LinkStatus) -> (Arc<Channel>, ChannelDriver) {
        let (status_tx, status_rx) = watch::channel(initial);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let channel = Arc::new(Channel {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            status_rx,
            write_tx,
            data_rx: Mutex::new(Some(data_rx)),
            cancel: cancel.clone(),
        });
        let driver = ChannelDriver {
            status: status_tx,
            data: data_tx,
            writes: write_rx,
            cancel,
        };
        (channel, driver)
    }

    /// Process-unique identifier.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Human-readable transport endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    pub fn status(&self) -> LinkStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status transitions.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    /// Enqueue bytes toward the transport. Silent no-op once terminal.
    pub fn write(&self, bytes: Bytes) {
        if self.status().is_terminal() {
            return;
        }
        let _ = self.write_tx.send(bytes);
    }

    /// Take the inbound chunk queue. Yields `Some` exactly once.
    pub fn take_data(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.data_rx.lock().expect("channel data mutex poisoned").take()
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Publish a status transition, refusing to leave a terminal state.
///
/// Returns whether the value changed.
pub fn advance_status(status: &watch::Sender<LinkStatus>, next: LinkStatus) -> bool {
    let mut moved = false;
    status.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        moved = true;
        true
    });
    moved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_after_terminal_status_is_dropped() {
        let (channel, driver) = Channel::pair("test", LinkStatus::Connected);
        channel.write(Bytes::from_static(b"a"));
        advance_status(&driver.status, LinkStatus::Closed);
        channel.write(Bytes::from_static(b"b"));
        let mut writes = driver.writes;
        assert_eq!(writes.try_recv().unwrap(), Bytes::from_static(b"a"));
        assert!(writes.try_recv().is_err());
    }

    #[test]
    fn data_queue_has_a_single_consumer() {
        let (channel, _driver) = Channel::pair("test", LinkStatus::Idle);
        assert!(channel.take_data().is_some());
        assert!(channel.take_data().is_none());
    }

    #[test]
    fn terminal_status_is_sticky() {
        let (channel, driver) = Channel::pair("test", LinkStatus::Waiting);
        assert!(advance_status(&driver.status, LinkStatus::Failed));
        assert!(!advance_status(&driver.status, LinkStatus::Connected));
        assert_eq!(channel.status(), LinkStatus::Failed);
    }

    #[test]
    fn close_is_idempotent() {
        let (channel, driver) = Channel::pair("test", LinkStatus::Connected);
        channel.close();
        channel.close();
        assert!(driver.cancel.is_cancelled());
    }
}
