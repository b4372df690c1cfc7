//! UDP transport: broadcast polling and per-peer channels.
//!
//! One ephemeral socket per manager, broadcast-enabled. Every poll tick the
//! configured poll message goes out to the broadcast endpoint of each
//! non-loopback IPv4 interface; robots on the segment answer from their own
//! address, and each distinct source endpoint becomes its own channel. A
//! peer that stays silent past the inactivity timeout is closed; a later
//! datagram from the same endpoint opens a fresh channel.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use edmo_types::LinkStatus;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::channel::{advance_status, Channel, ChannelDriver};
use super::TransportEvent;

const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// UDP manager settings.
#[derive(Debug, Clone)]
pub struct UdpManagerConfig {
    /// Destination port robots listen on.
    pub port: u16,
    /// Bytes broadcast on every poll tick.
    pub poll_message: Bytes,
    /// Poll cadence.
    pub poll_interval: Duration,
    /// Silence budget before a peer channel is closed.
    pub inactivity_timeout: Duration,
}

impl UdpManagerConfig {
    /// Settings for the reference deployment, polling the given message.
    pub fn new(poll_message: Bytes) -> Self {
        Self {
            port: 2121,
            poll_message,
            poll_interval: Duration::from_secs(1),
            inactivity_timeout: Duration::from_secs(10),
        }
    }
}

/// Broadcast poller and per-peer demultiplexer.
pub struct UdpManager {
    cancel: CancellationToken,
    local_addr: SocketAddr,
}

struct Peer {
    channel: Arc<Channel>,
    status: Arc<watch::Sender<LinkStatus>>,
    data: mpsc::UnboundedSender<Bytes>,
    last_seen: Instant,
}

impl UdpManager {
    /// Bind the shared socket and spawn the poll and receive loop.
    pub async fn spawn(
        config: UdpManagerConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
        parent: &CancellationToken,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;
        let cancel = parent.child_token();
        tokio::spawn(run(Arc::new(socket), config, events, cancel.clone()));
        Ok(Self { cancel, local_addr })
    }

    /// The ephemeral address the shared socket bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop polling and close every peer channel.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run(
    socket: Arc<UdpSocket>,
    config: UdpManagerConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut peers: HashMap<SocketAddr, Peer> = HashMap::new();
    let mut poll = interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = poll.tick() => {
                for endpoint in broadcast_endpoints(config.port) {
                    if let Err(err) = socket.send_to(&config.poll_message, endpoint).await {
                        trace!(%endpoint, error = %err, "broadcast poll skipped endpoint");
                    }
                }
                expire_peers(&mut peers, config.inactivity_timeout, &events);
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    let peer = peers.entry(from).or_insert_with(|| {
                        info!(peer = %from, "udp channel established");
                        let peer = new_peer(socket.clone(), from, &cancel);
                        let _ = events.send(TransportEvent::ChannelEstablished(peer.channel.clone()));
                        peer
                    });
                    peer.last_seen = Instant::now();
                    let _ = peer.data.send(Bytes::copy_from_slice(&buf[..len]));
                }
                Err(err) => {
                    // Transient ICMP-induced errors are normal on some hosts.
                    debug!(error = %err, "udp receive failed");
                }
            },
        }
    }

    for (_, peer) in peers {
        advance_status(&peer.status, LinkStatus::Closed);
        peer.channel.close();
    }
}

fn expire_peers(
    peers: &mut HashMap<SocketAddr, Peer>,
    timeout: Duration,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    peers.retain(|addr, peer| {
        let expired = peer.last_seen.elapsed() > timeout || peer.channel.status().is_terminal();
        if expired {
            info!(peer = %addr, "udp channel expired");
            advance_status(&peer.status, LinkStatus::Closed);
            peer.channel.close();
            let _ = events.send(TransportEvent::ChannelLost(peer.channel.clone()));
        }
        !expired
    });
}

fn new_peer(socket: Arc<UdpSocket>, addr: SocketAddr, parent: &CancellationToken) -> Peer {
    let (channel, driver) = Channel::pair(format!("udp:{addr}"), LinkStatus::Connected);
    let ChannelDriver {
        status,
        data,
        mut writes,
        cancel,
    } = driver;
    let status = Arc::new(status);
    let pump_status = status.clone();
    let parent = parent.child_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = parent.cancelled() => {
                    advance_status(&pump_status, LinkStatus::Closed);
                    break;
                }
                _ = cancel.cancelled() => {
                    advance_status(&pump_status, LinkStatus::Closed);
                    break;
                }
                write = writes.recv() => match write {
                    Some(bytes) => {
                        if let Err(err) = socket.send_to(&bytes, addr).await {
                            warn!(peer = %addr, error = %err, "udp write failed");
                            advance_status(&pump_status, LinkStatus::Failed);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });
    Peer {
        channel,
        status,
        data,
        last_seen: Instant::now(),
    }
}

/// One broadcast endpoint per non-loopback IPv4 interface.
///
/// The broadcast address is the unicast address with the host bits forced
/// to ones (`addr | !netmask`).
fn broadcast_endpoints(port: u16) -> Vec<SocketAddr> {
    let mut endpoints = Vec::new();
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(err) => {
            warn!(error = %err, "interface enumeration failed");
            return endpoints;
        }
    };
    for interface in interfaces {
        if interface.is_loopback() {
            continue;
        }
        if let if_addrs::IfAddr::V4(v4) = interface.addr {
            let addr = u32::from(v4.ip);
            let netmask = u32::from(v4.netmask);
            let broadcast = Ipv4Addr::from(addr | !netmask);
            endpoints.push(SocketAddr::from((broadcast, port)));
        }
    }
    endpoints.sort();
    endpoints.dedup();
    endpoints
}
