//! The fused device: one logical robot over several transports.
//!
//! A robot reachable over serial and UDP at once yields two device
//! connections with the same identifier. The fused device keeps them in
//! insertion order, treats the head as active, and forwards the active
//! connection's events to its own subscribers. When the active member is
//! removed the next in line is promoted and rebound atomically; sessions
//! above never notice the swap.

use std::sync::{Arc, Mutex};

use edmo_types::DeviceIdentity;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::{DeviceConnection, DeviceEvent};
use crate::protocol::packets::Command;

const EVENT_CAPACITY: usize = 256;

/// Ordered union of device connections sharing one identifier.
pub struct FusedDevice {
    identifier: String,
    inner: Mutex<FusedInner>,
    events: broadcast::Sender<DeviceEvent>,
}

struct FusedInner {
    members: Vec<Arc<DeviceConnection>>,
    forward: Option<CancellationToken>,
}

impl FusedDevice {
    /// Create an empty fused device for the identifier.
    pub fn new(identifier: impl Into<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            identifier: identifier.into(),
            inner: Mutex::new(FusedInner {
                members: Vec::new(),
                forward: None,
            }),
            events,
        })
    }

    /// The logical device identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Subscribe to events forwarded from the active connection.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Append a member; the first member becomes active and is bound.
    pub fn add(&self, connection: Arc<DeviceConnection>) {
        let mut inner = self.lock();
        inner.members.push(connection);
        if inner.members.len() == 1 {
            self.bind_active(&mut inner);
        }
    }

    /// Remove a member. Removing the active unbinds it and promotes the
    /// next in insertion order. Returns whether the device is now empty.
    pub fn remove(&self, connection: &Arc<DeviceConnection>) -> bool {
        let mut inner = self.lock();
        let Some(position) = inner
            .members
            .iter()
            .position(|member| Arc::ptr_eq(member, connection))
        else {
            return inner.members.is_empty();
        };
        inner.members.remove(position);
        if position == 0 {
            if let Some(forward) = inner.forward.take() {
                forward.cancel();
            }
            if !inner.members.is_empty() {
                debug!(
                    identifier = %self.identifier,
                    channel = %inner.members[0].channel_name(),
                    "failover to standby connection"
                );
                self.bind_active(&mut inner);
            }
        }
        inner.members.is_empty()
    }

    /// Number of member connections.
    pub fn member_count(&self) -> usize {
        self.lock().members.len()
    }

    /// Identification projected from the active connection.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.lock().members.first().and_then(|active| active.identity())
    }

    /// Oscillator count of the active connection, zero when empty.
    pub fn oscillator_count(&self) -> u8 {
        self.identity().map(|identity| identity.oscillator_count).unwrap_or(0)
    }

    /// Arm hues of the active connection, empty when empty.
    pub fn arm_hues(&self) -> Vec<u16> {
        self.identity().map(|identity| identity.arm_hues).unwrap_or_default()
    }

    /// Soft-lock flag of the active connection, false when empty.
    pub fn is_locked(&self) -> bool {
        self.identity().map(|identity| identity.is_locked).unwrap_or(false)
    }

    /// Write a command through the active connection. Silent no-op when
    /// the member list is empty.
    pub fn write_command(&self, command: &Command) {
        if let Some(active) = self.lock().members.first() {
            active.write_command(command);
        }
    }

    fn bind_active(&self, inner: &mut FusedInner) {
        let active = inner.members[0].clone();
        let token = CancellationToken::new();
        inner.forward = Some(token.clone());
        let events = self.events.clone();
        // Subscribe before spawning so nothing the new active emits after
        // the promotion can slip past the forwarder.
        let mut source = active.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = source.recv() => match event {
                        Ok(event) => {
                            let _ = events.send(event);
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FusedInner> {
        self.inner.lock().expect("fused device lock poisoned")
    }
}

impl std::fmt::Debug for FusedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusedDevice")
            .field("identifier", &self.identifier)
            .field("members", &self.member_count())
            .finish()
    }
}
