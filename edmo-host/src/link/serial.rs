//! Serial transport: per-port channels and the port scanner.
//!
//! EDMO robots enumerate as USB serial devices at 9600 baud, 8-N-1. DTR is
//! asserted on open; boards that wire DTR to their reset line would
//! otherwise reboot on every host connection. Opening retries for a short
//! window because the OS briefly holds a port busy right after enumeration.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use edmo_types::LinkStatus;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialPortType, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::channel::{advance_status, Channel, ChannelDriver};
use super::TransportEvent;
use std::sync::Arc;

/// Line rate of every EDMO robot.
pub const BAUD_RATE: u32 = 9600;

const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);
const SCAN_INTERVAL: Duration = Duration::from_secs(1);
const READ_BUFFER_SIZE: usize = 1024;

/// Diff-polls the OS serial enumeration and mints one channel per port.
pub struct SerialManager {
    cancel: CancellationToken,
}

struct TrackedPort {
    channel: Arc<Channel>,
    active: bool,
}

impl SerialManager {
    /// Spawn the scanner. Channel lifecycle is announced on `events`.
    pub fn spawn(
        events: mpsc::UnboundedSender<TransportEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        tokio::spawn(run_scanner(events, cancel.clone()));
        Self { cancel }
    }

    /// Stop the scanner and close every tracked channel.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run_scanner(events: mpsc::UnboundedSender<TransportEvent>, cancel: CancellationToken) {
    let mut tracked: HashMap<String, TrackedPort> = HashMap::new();
    let mut tick = interval(SCAN_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let present = enumerate_ports();
        for name in &present {
            if !tracked.contains_key(name) {
                debug!(port = %name, "serial port appeared");
                let channel = spawn_serial_channel(name, &cancel);
                tracked.insert(name.clone(), TrackedPort { channel, active: false });
            }
        }

        tracked.retain(|name, port| {
            if !present.contains(name) {
                port.channel.close();
                if port.active {
                    info!(port = %name, "serial port disappeared");
                    let _ = events.send(TransportEvent::ChannelLost(port.channel.clone()));
                }
                return false;
            }
            match port.channel.status() {
                LinkStatus::Connected if !port.active => {
                    port.active = true;
                    info!(port = %name, "serial channel established");
                    let _ = events.send(TransportEvent::ChannelEstablished(port.channel.clone()));
                    true
                }
                LinkStatus::Failed | LinkStatus::Closed => {
                    port.channel.close();
                    if port.active {
                        info!(port = %name, "serial channel lost");
                        let _ = events.send(TransportEvent::ChannelLost(port.channel.clone()));
                    }
                    false
                }
                _ => true,
            }
        });
    }

    for (_, port) in tracked {
        port.channel.close();
    }
}

/// Enumerate candidate port names.
///
/// Windows keeps phantom `COMx` registry entries enumerable for a while
/// after an unplug. The robust remedy is intersecting the name list with a
/// second, independent device-instance enumeration (SetupAPI); this
/// instead drops `Unknown`-typed entries from the single enumeration we
/// already have. The port type is derived from the entry's device-instance
/// record, so a stale entry with no backing instance classifies as
/// `Unknown`; this approximates the intersection but is not the real
/// thing. A phantom that slips through still dies on its own: the open retries
/// exhaust the 3 s budget, the channel reports `failed`, and the scanner
/// forgets the port.
fn enumerate_ports() -> Vec<String> {
    let ports = match tokio_serial::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            warn!(error = %err, "serial enumeration failed");
            return Vec::new();
        }
    };
    ports
        .into_iter()
        .filter(|port| !cfg!(windows) || !matches!(port.port_type, SerialPortType::Unknown))
        .map(|port| port.port_name)
        .collect()
}

/// Open a serial channel for the named port and run its I/O task.
pub fn spawn_serial_channel(path: &str, parent: &CancellationToken) -> Arc<Channel> {
    let (channel, driver) = Channel::pair(format!("serial:{path}"), LinkStatus::Waiting);
    tokio::spawn(run_channel(path.to_owned(), driver, parent.child_token()));
    channel
}

async fn run_channel(path: String, mut driver: ChannelDriver, parent: CancellationToken) {
    let port = tokio::select! {
        _ = parent.cancelled() => None,
        _ = driver.cancel.cancelled() => None,
        port = open_with_retry(&path) => port,
    };
    let Some(port) = port else {
        advance_status(&driver.status, LinkStatus::Failed);
        return;
    };
    advance_status(&driver.status, LinkStatus::Connected);

    let (mut reader, mut writer) = tokio::io::split(port);
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = parent.cancelled() => {
                advance_status(&driver.status, LinkStatus::Closed);
                break;
            }
            _ = driver.cancel.cancelled() => {
                advance_status(&driver.status, LinkStatus::Closed);
                break;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    advance_status(&driver.status, LinkStatus::Closed);
                    break;
                }
                Ok(n) => {
                    trace!(port = %path, bytes = n, "serial read");
                    let _ = driver.data.send(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(err) => {
                    warn!(port = %path, error = %err, "serial read failed");
                    advance_status(&driver.status, LinkStatus::Failed);
                    break;
                }
            },
            write = driver.writes.recv() => match write {
                Some(bytes) => {
                    if let Err(err) = writer.write_all(&bytes).await {
                        warn!(port = %path, error = %err, "serial write failed");
                        advance_status(&driver.status, LinkStatus::Failed);
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

/// Open the port, retrying recoverable errors within the overall budget.
async fn open_with_retry(path: &str) -> Option<SerialStream> {
    let deadline = Instant::now() + OPEN_TIMEOUT;
    loop {
        match tokio_serial::new(path, BAUD_RATE).open_native_async() {
            Ok(mut port) => {
                if let Err(err) = port.write_data_terminal_ready(true) {
                    warn!(port = %path, error = %err, "failed to assert DTR");
                }
                return Some(port);
            }
            Err(err) => {
                if Instant::now() + OPEN_RETRY_INTERVAL > deadline {
                    debug!(port = %path, error = %err, "serial open gave up");
                    return None;
                }
                trace!(port = %path, error = %err, "serial open retrying");
                sleep(OPEN_RETRY_INTERVAL).await;
            }
        }
    }
}
