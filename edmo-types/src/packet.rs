//! Packet-type tags of the framed binary protocol.
//!
//! The first byte of every unescaped payload carries one of these tags; the
//! remainder of the payload is the tag-specific body.

use crate::error::ProtocolError;

/// Packet-type tag, the first byte of an unescaped payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Identification request (host) / identification reply (device).
    Identify = 0,
    /// Session start marker carrying the host's last known device time.
    SessionStart = 1,
    /// Device time request / reply.
    GetTime = 2,
    /// Oscillator parameter write for a single oscillator index.
    UpdateOscillator = 3,
    /// Instantaneous oscillator state report for a single index.
    SendMotorData = 4,
    /// Inertial-measurement aggregate report.
    SendImuData = 5,
    /// Session end marker.
    SessionEnd = 6,
    /// Combined report: device time, every oscillator state, IMU aggregate.
    SendAllData = 69,
}

impl PacketKind {
    /// The on-wire tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketKind::Identify),
            1 => Ok(PacketKind::SessionStart),
            2 => Ok(PacketKind::GetTime),
            3 => Ok(PacketKind::UpdateOscillator),
            4 => Ok(PacketKind::SendMotorData),
            5 => Ok(PacketKind::SendImuData),
            6 => Ok(PacketKind::SessionEnd),
            69 => Ok(PacketKind::SendAllData),
            _ => Err(ProtocolError::MalformedPayload),
        }
    }
}
