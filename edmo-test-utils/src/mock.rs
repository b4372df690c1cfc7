//! A channel whose transport side is the test.
//!
//! The mock holds the driver half of a [`Channel`] pair: tests feed inbound
//! chunks (with whatever adversarial chunking they like), flip the status,
//! and inspect the frames the stack wrote outbound.

use std::sync::Arc;

use bytes::Bytes;
use edmo_host::protocol::framing;
use edmo_host::{Channel, ChannelDriver};
use edmo_types::LinkStatus;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Scriptable transport double for one channel.
pub struct MockChannel {
    channel: Arc<Channel>,
    status: watch::Sender<LinkStatus>,
    data: mpsc::UnboundedSender<Bytes>,
    writes: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
}

impl MockChannel {
    /// A mock channel that reports `Connected` from the start.
    pub fn connected(name: &str) -> Self {
        Self::with_status(name, LinkStatus::Connected)
    }

    /// A mock channel with an explicit initial status.
    pub fn with_status(name: &str, status: LinkStatus) -> Self {
        let (channel, driver) = Channel::pair(name, status);
        let ChannelDriver {
            status,
            data,
            writes,
            cancel,
        } = driver;
        Self {
            channel,
            status,
            data,
            writes,
            cancel,
        }
    }

    /// The consumer-side handle under test.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Deliver one inbound chunk exactly as a transport would.
    pub fn feed(&self, chunk: &[u8]) {
        let _ = self.data.send(Bytes::copy_from_slice(chunk));
    }

    /// Frame a payload and deliver it as one chunk.
    pub fn feed_frame(&self, payload: &[u8]) {
        self.feed(&framing::frame(payload));
    }

    /// Publish a status transition.
    pub fn set_status(&self, status: LinkStatus) {
        let _ = self.status.send(status);
    }

    /// Whether the stack closed the channel.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await the next outbound write (one complete frame).
    pub async fn next_write(&mut self) -> Option<Bytes> {
        self.writes.recv().await
    }

    /// Take an already-enqueued outbound write, if any.
    pub fn try_next_write(&mut self) -> Option<Bytes> {
        self.writes.try_recv().ok()
    }

    /// Drain every enqueued outbound frame into unescaped payloads.
    pub fn drain_write_payloads(&mut self) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        let mut assembler = framing::FrameAssembler::new();
        while let Ok(frame) = self.writes.try_recv() {
            assembler.extend(&frame, |payload| payloads.push(payload));
        }
        payloads
    }
}
