//! The connection manager: transports in, fused devices out.
//!
//! Composes the serial and UDP managers, wraps every established channel in
//! a device connection, ages the waiting connections at 1 Hz, and groups
//! validated connections into fused devices by identifier. Device lifecycle
//! (first connection up, last connection gone, lock flips) is announced on
//! a broadcast stream the session layer consumes.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use edmo_types::LinkStatus;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::connection::{DeviceConnection, DeviceEvent};
use super::fused::FusedDevice;
use crate::config::HostConfig;
use crate::host_lock_key;
use crate::link::channel::ChannelId;
use crate::link::serial::SerialManager;
use crate::link::udp::{UdpManager, UdpManagerConfig};
use crate::link::TransportEvent;
use crate::protocol::packets::Command;

const AGING_INTERVAL: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 64;

/// Fused-device lifecycle announcements.
#[derive(Debug, Clone)]
pub enum DeviceLifecycleEvent {
    /// A device identifier appeared: its fused device has its first member.
    DeviceConnected(Arc<FusedDevice>),
    /// A device identifier disappeared: its last member departed.
    DeviceLost(String),
    /// A known device's soft-lock flag flipped.
    DeviceLockChanged {
        /// The device identifier.
        identifier: String,
        /// The new lock flag.
        locked: bool,
    },
}

/// Owns the transport managers and the fused-device catalog.
pub struct ConnectionManager {
    cancel: CancellationToken,
    events: broadcast::Sender<DeviceLifecycleEvent>,
    devices: Arc<Mutex<HashMap<String, Arc<FusedDevice>>>>,
}

impl ConnectionManager {
    /// Start both transports and the aging loop.
    pub async fn spawn(config: &HostConfig, parent: &CancellationToken) -> io::Result<Self> {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let manager = Self::from_transport_stream(transport_rx, parent);

        if config.serial.enabled {
            SerialManager::spawn(transport_tx.clone(), &manager.cancel);
        }
        if config.udp.enabled {
            // The poll message is a complete identification frame; robots
            // answer it with their identification reply.
            let poll_message = Bytes::from(
                Command::Identify {
                    lock_key: host_lock_key(),
                }
                .encode(),
            );
            let udp_config = UdpManagerConfig {
                port: config.udp.port,
                poll_message,
                poll_interval: Duration::from_millis(config.udp.poll_interval_ms),
                inactivity_timeout: Duration::from_secs(config.udp.inactivity_timeout_s),
            };
            if let Err(err) = UdpManager::spawn(udp_config, transport_tx.clone(), &manager.cancel).await {
                manager.shutdown();
                return Err(err);
            }
        }

        Ok(manager)
    }

    /// Run the aging loop over an externally supplied transport stream.
    ///
    /// This is the seam the built-in transports feed; any other channel
    /// source (tests included) plugs in the same way.
    pub fn from_transport_stream(
        transports: mpsc::UnboundedReceiver<TransportEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let devices = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(run(
            transports,
            events.clone(),
            devices.clone(),
            cancel.clone(),
        ));
        Self {
            cancel,
            events,
            devices,
        }
    }

    /// Subscribe to device lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceLifecycleEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the known fused devices.
    pub fn devices(&self) -> Vec<Arc<FusedDevice>> {
        self.devices
            .lock()
            .expect("device catalog lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Look up a fused device by identifier.
    pub fn device(&self, identifier: &str) -> Option<Arc<FusedDevice>> {
        self.devices
            .lock()
            .expect("device catalog lock poisoned")
            .get(identifier)
            .cloned()
    }

    /// Stop the transports and drop every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut transports: mpsc::UnboundedReceiver<TransportEvent>,
    events: broadcast::Sender<DeviceLifecycleEvent>,
    devices: Arc<Mutex<HashMap<String, Arc<FusedDevice>>>>,
    cancel: CancellationToken,
) {
    let mut waiting: Vec<Arc<DeviceConnection>> = Vec::new();
    let mut by_channel: HashMap<ChannelId, Arc<DeviceConnection>> = HashMap::new();
    let mut tick = interval(AGING_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = transports.recv() => match event {
                Some(TransportEvent::ChannelEstablished(channel)) => {
                    debug!(channel = %channel.name(), "wrapping channel in device connection");
                    let connection = DeviceConnection::spawn(channel, &cancel);
                    by_channel.insert(connection.channel_id(), connection.clone());
                    waiting.push(connection);
                }
                Some(TransportEvent::ChannelLost(channel)) => {
                    let Some(connection) = by_channel.remove(&channel.id()) else {
                        continue;
                    };
                    connection.close();
                    waiting.retain(|pending| !Arc::ptr_eq(pending, &connection));
                    if let Some(identifier) = connection.identifier() {
                        let mut catalog = devices.lock().expect("device catalog lock poisoned");
                        let device = catalog.get(&identifier).cloned();
                        if let Some(device) = device {
                            if device.remove(&connection) {
                                catalog.remove(&identifier);
                                drop(catalog);
                                info!(identifier = %identifier, "device lost");
                                let _ = events.send(DeviceLifecycleEvent::DeviceLost(identifier));
                            }
                        }
                    }
                }
                None => break,
            },
            _ = tick.tick() => {
                let mut still_waiting = Vec::with_capacity(waiting.len());
                for connection in waiting.drain(..) {
                    match connection.status() {
                        LinkStatus::Connected => {
                            fuse(connection, &devices, &events, &cancel);
                        }
                        LinkStatus::Failed | LinkStatus::Closed => {
                            by_channel.remove(&connection.channel_id());
                            connection.close();
                        }
                        _ => still_waiting.push(connection),
                    }
                }
                waiting = still_waiting;
            }
        }
    }

    for (_, connection) in by_channel {
        connection.close();
    }
}

fn fuse(
    connection: Arc<DeviceConnection>,
    devices: &Arc<Mutex<HashMap<String, Arc<FusedDevice>>>>,
    events: &broadcast::Sender<DeviceLifecycleEvent>,
    cancel: &CancellationToken,
) {
    // Connected implies the identifier is set.
    let Some(identifier) = connection.identifier() else {
        connection.close();
        return;
    };
    let mut catalog = devices.lock().expect("device catalog lock poisoned");
    if let Some(device) = catalog.get(&identifier) {
        debug!(identifier = %identifier, channel = %connection.channel_name(), "standby connection fused");
        device.add(connection);
        return;
    }
    let device = FusedDevice::new(&identifier);
    device.add(connection);
    catalog.insert(identifier.clone(), device.clone());
    drop(catalog);
    info!(identifier = %identifier, "device connected");
    tokio::spawn(forward_lock_changes(
        device.clone(),
        events.clone(),
        cancel.clone(),
    ));
    let _ = events.send(DeviceLifecycleEvent::DeviceConnected(device));
}

/// Relay the fused device's lock flips into the lifecycle stream so the
/// session manager can refresh its availability view.
async fn forward_lock_changes(
    device: Arc<FusedDevice>,
    events: broadcast::Sender<DeviceLifecycleEvent>,
    cancel: CancellationToken,
) {
    let mut source = device.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = source.recv() => match event {
                Ok(DeviceEvent::LockStateChanged(locked)) => {
                    let _ = events.send(DeviceLifecycleEvent::DeviceLockChanged {
                        identifier: device.identifier().to_owned(),
                        locked,
                    });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
