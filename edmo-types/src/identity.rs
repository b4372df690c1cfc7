//! The device identification record.

use serde::{Deserialize, Serialize};

/// Parsed identification reply of an EDMO robot.
///
/// Wire layout: `identifier: NUL-terminated ASCII · oscillator_count: u8 ·
/// hue[oscillator_count]: u16 LE · is_locked: u8`. The decoder guarantees
/// `arm_hues.len() == oscillator_count` and rejects empty identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// The robot's logical identifier, unique within a deployment.
    pub identifier: String,
    /// Number of oscillators (arms) the robot drives.
    pub oscillator_count: u8,
    /// Display hue per arm, raw device values (360 is an allowed raw value).
    pub arm_hues: Vec<u16>,
    /// Whether another host currently holds the device's soft lock.
    pub is_locked: bool,
}
