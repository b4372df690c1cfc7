//! Transport layer: the uniform channel abstraction and the two transport
//! managers that mint channels.
//!
//! A channel is a duplex byte pipe with an observable status; it assumes no
//! framing. The serial manager diff-polls the OS port enumeration, the UDP
//! manager broadcast-polls every IPv4 interface and demultiplexes replies
//! into per-peer channels. Both surface channel lifecycle through the same
//! [`TransportEvent`] stream.

pub mod channel;
pub mod serial;
pub mod udp;

use std::sync::Arc;

use channel::Channel;

/// Lifecycle announcements shared by all transport managers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A channel reached its connected state and is ready for use.
    ChannelEstablished(Arc<Channel>),
    /// A previously established channel is gone.
    ChannelLost(Arc<Channel>),
}
