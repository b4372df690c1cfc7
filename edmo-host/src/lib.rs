//! # EDMO Host Stack
//!
//! Discovers, connects to, and multiplexes sessions against a population of
//! EDMO robots. Each robot speaks a framed binary protocol over one or more
//! transports (serial line, UDP broadcast); a robot reachable over several
//! transports at once is fused into a single logical device with ordered
//! failover. Multiple users share one device by each controlling one
//! oscillator, while the device streams oscillator state and IMU samples
//! back.
//!
//! ## Architecture
//!
//! The stack is layered, leaves first:
//!
//! - **Protocol**: escape encoding, frame assembly, fixed-layout packet
//!   (de)serialization.
//! - **Link**: the uniform channel abstraction plus the two transport
//!   managers (serial port scanner, UDP broadcast poller).
//! - **Device**: the per-channel connection state machine, the fused device,
//!   and the connection manager composing both transports.
//! - **Session**: admission control, parameter authority, periodic hardware
//!   reconciliation, the plugin host, and the session catalog.
//!
//! Every long-running loop is a tokio task carrying a cancellation token
//! linked to its owning component; shutdown cascades top-down.

pub mod config;
pub mod device;
pub mod link;
pub mod protocol;
pub mod session;

use std::sync::LazyLock;

use uuid::Uuid;

pub use config::HostConfig;
pub use device::connection::{DeviceConnection, DeviceEvent};
pub use device::fused::FusedDevice;
pub use device::manager::{ConnectionManager, DeviceLifecycleEvent};
pub use link::channel::{Channel, ChannelDriver, ChannelId};
pub use session::context::{ControllerEvent, ControllerHandle};
pub use session::core::Session;
pub use session::manager::SessionManager;
pub use session::plugin::{
    Objective, ObjectiveGroup, PluginCapabilities, PluginFactory, SessionPlugin,
};

static HOST_LOCK_KEY: LazyLock<Uuid> = LazyLock::new(Uuid::new_v4);

/// The per-process lock key sent in every identification command.
///
/// Stable for the lifetime of the process so a host can retake a device's
/// soft lock from itself after a transport hiccup.
pub fn host_lock_key() -> Uuid {
    *HOST_LOCK_KEY
}
