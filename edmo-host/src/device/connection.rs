//! The device connection state machine.
//!
//! A connection wraps one channel, proves it is talking to an EDMO robot,
//! and turns the byte stream into typed events. Construction immediately
//! writes a framed identification command carrying the host's lock key;
//! a validator gives the device a fixed window to answer before the channel
//! is condemned.
//!
//! Status is monotonic: `waiting → connected` on identification, and
//! terminal `failed`/`closed` states are never left. The aggregate status
//! collapses to the channel's terminal state if the channel dies first.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use edmo_types::{DeviceIdentity, ImuSample, LinkStatus, OscillatorState};
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::link::channel::{advance_status, Channel, ChannelId};
use crate::protocol::packets::{decode_reply, Command, Reply};
use crate::protocol::framing::FrameAssembler;
use crate::host_lock_key;

/// How long a device gets to answer the identification command.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(3);

const EVENT_CAPACITY: usize = 256;

/// Typed events decoded from a device connection.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The device reported its clock.
    TimeReceived(u32),
    /// The device reported one oscillator's instantaneous state.
    OscillationData {
        /// Oscillator index.
        index: u8,
        /// Reported state.
        state: OscillatorState,
    },
    /// The device reported an IMU aggregate.
    ImuData(ImuSample),
    /// The device's soft-lock flag flipped.
    LockStateChanged(bool),
    /// A frame arrived whose payload did not decode; raw payload attached.
    UnknownPacket(Bytes),
}

/// A validated (or validating) connection to an EDMO robot over one channel.
pub struct DeviceConnection {
    channel: Arc<Channel>,
    status_tx: Arc<watch::Sender<LinkStatus>>,
    status_rx: watch::Receiver<LinkStatus>,
    identity: Arc<RwLock<Option<DeviceIdentity>>>,
    events: broadcast::Sender<DeviceEvent>,
    cancel: CancellationToken,
}

impl DeviceConnection {
    /// Wrap a channel, send the identification command, and start the read
    /// and validation tasks.
    pub fn spawn(channel: Arc<Channel>, parent: &CancellationToken) -> Arc<Self> {
        let (status_tx, status_rx) = watch::channel(LinkStatus::Waiting);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connection = Arc::new(Self {
            channel,
            status_tx: Arc::new(status_tx),
            status_rx,
            identity: Arc::new(RwLock::new(None)),
            events,
            cancel: parent.child_token(),
        });

        connection.write_command(&Command::Identify {
            lock_key: host_lock_key(),
        });

        tokio::spawn(run_reader(connection.clone()));
        tokio::spawn(run_validator(connection.clone()));
        connection
    }

    /// Aggregate status: the channel's terminal state wins, otherwise the
    /// connection's own.
    pub fn status(&self) -> LinkStatus {
        let channel_status = self.channel.status();
        if channel_status.is_terminal() {
            return channel_status;
        }
        *self.status_rx.borrow()
    }

    /// Snapshot of the parsed identification, if any arrived yet.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity.read().expect("identity lock poisoned").clone()
    }

    /// The device identifier, set once identification arrived.
    pub fn identifier(&self) -> Option<String> {
        self.identity().map(|identity| identity.identifier)
    }

    /// Subscribe to typed events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Subscribe to the connection's own status transitions.
    ///
    /// This is the validation-driven status; [`DeviceConnection::status`]
    /// additionally collapses to the channel's terminal state.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    /// Serialize, frame and enqueue a typed command.
    pub fn write_command(&self, command: &Command) {
        self.channel.write(Bytes::from(command.encode()));
    }

    /// The identifier of the underlying channel.
    pub fn channel_id(&self) -> ChannelId {
        self.channel.id()
    }

    /// The name of the underlying channel endpoint.
    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// Tear the connection down, closing the channel.
    pub fn close(&self) {
        advance_status(&self.status_tx, LinkStatus::Closed);
        self.cancel.cancel();
        self.channel.close();
    }

    fn dispatch(&self, payload: Vec<u8>) {
        let cached_count = self
            .identity
            .read()
            .expect("identity lock poisoned")
            .as_ref()
            .map(|identity| identity.oscillator_count as usize)
            .unwrap_or(0);
        match decode_reply(&payload, cached_count) {
            Ok(Reply::Identification(identity)) => self.apply_identification(identity),
            Ok(Reply::Time(time)) => {
                let _ = self.events.send(DeviceEvent::TimeReceived(time));
            }
            Ok(Reply::MotorData { index, state }) => {
                let _ = self.events.send(DeviceEvent::OscillationData { index, state });
            }
            Ok(Reply::ImuData(imu)) => {
                let _ = self.events.send(DeviceEvent::ImuData(imu));
            }
            Ok(Reply::AllData { time, states, imu }) => {
                let _ = self.events.send(DeviceEvent::TimeReceived(time));
                for (index, state) in states.into_iter().enumerate() {
                    let _ = self.events.send(DeviceEvent::OscillationData {
                        index: index as u8,
                        state,
                    });
                }
                let _ = self.events.send(DeviceEvent::ImuData(imu));
            }
            Err(err) => {
                trace!(channel = %self.channel.name(), error = %err, "undecodable frame");
                let _ = self
                    .events
                    .send(DeviceEvent::UnknownPacket(Bytes::from(payload)));
            }
        }
    }

    fn apply_identification(&self, identity: DeviceIdentity) {
        let lock_changed = {
            let mut slot = self.identity.write().expect("identity lock poisoned");
            let previous = slot.as_ref().map(|identity| identity.is_locked);
            let changed = previous.is_some_and(|locked| locked != identity.is_locked);
            // Identifier becomes visible last, after the rest of the record,
            // so observers never see a half-populated connection.
            *slot = Some(identity.clone());
            changed
        };
        if advance_status(&self.status_tx, LinkStatus::Connected) {
            debug!(
                channel = %self.channel.name(),
                identifier = %identity.identifier,
                oscillators = identity.oscillator_count,
                "device identified"
            );
        }
        if lock_changed {
            let _ = self
                .events
                .send(DeviceEvent::LockStateChanged(identity.is_locked));
        }
    }
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("channel", &self.channel.name())
            .field("status", &self.status())
            .field("identifier", &self.identifier())
            .finish()
    }
}

async fn run_reader(connection: Arc<DeviceConnection>) {
    let Some(mut data) = connection.channel.take_data() else {
        warn!(channel = %connection.channel.name(), "channel data already claimed");
        return;
    };
    let mut assembler = FrameAssembler::new();
    loop {
        tokio::select! {
            _ = connection.cancel.cancelled() => break,
            chunk = data.recv() => match chunk {
                Some(chunk) => {
                    for &byte in chunk.iter() {
                        if let Some(payload) = assembler.push(byte) {
                            connection.dispatch(payload);
                        }
                    }
                }
                // Transport gone; the channel status carries the verdict.
                None => break,
            },
        }
    }
}

async fn run_validator(connection: Arc<DeviceConnection>) {
    tokio::select! {
        _ = connection.cancel.cancelled() => return,
        _ = sleep(VALIDATION_TIMEOUT) => {}
    }
    if connection.identity().is_none() {
        debug!(channel = %connection.channel.name(), "identification timed out");
        advance_status(&connection.status_tx, LinkStatus::Failed);
        connection.channel.close();
    } else {
        // Identification normally promotes the status itself; this only
        // matters if the reply raced the validator.
        advance_status(&connection.status_tx, LinkStatus::Connected);
    }
}
