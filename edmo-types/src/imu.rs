//! Inertial-measurement aggregate records.
//!
//! The device reports one aggregate covering five sensor modalities. Each
//! modality is wrapped in a [`SensorSample`] carrying the device timestamp
//! and an accuracy grade; the wire layout keeps three bytes of padding
//! between `accuracy` and the sample data (natural alignment of the
//! device-side struct).

use serde::{Deserialize, Serialize};

/// Three-component vector of little-endian `f32` values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
}

impl Vec3 {
    /// Byte length of the wire encoding.
    pub const WIRE_SIZE: usize = 12;
}

/// Quaternion of little-endian `f32` values in `x, y, z, w` wire order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quaternion {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
    /// W (scalar) component.
    pub w: f32,
}

impl Quaternion {
    /// Byte length of the wire encoding.
    pub const WIRE_SIZE: usize = 16;
}

/// One sensor modality reading.
///
/// Wire layout: `timestamp: u32 LE · accuracy: u8 · 3 bytes padding · data`.
/// The padding belongs to the layout and is preserved on both directions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSample<T> {
    /// Device-side capture timestamp in milliseconds.
    pub timestamp: u32,
    /// Sensor accuracy grade as reported by the device's fusion core.
    pub accuracy: u8,
    /// The sample payload.
    pub data: T,
}

/// Bytes occupied by the `timestamp · accuracy · padding` sample prefix.
pub(crate) const SAMPLE_PREFIX_SIZE: usize = 8;

impl<T> SensorSample<T> {
    /// Byte length of the wire encoding given the payload size.
    pub const fn wire_size(data_size: usize) -> usize {
        SAMPLE_PREFIX_SIZE + data_size
    }
}

/// The aggregate IMU record, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImuSample {
    /// Angular velocity.
    pub gyroscope: SensorSample<Vec3>,
    /// Linear acceleration including gravity.
    pub accelerometer: SensorSample<Vec3>,
    /// Magnetic field.
    pub magnetic_field: SensorSample<Vec3>,
    /// Gravity direction.
    pub gravity: SensorSample<Vec3>,
    /// Absolute orientation.
    pub rotation: SensorSample<Quaternion>,
}

impl ImuSample {
    /// Byte length of the wire encoding.
    pub const WIRE_SIZE: usize = 4 * SensorSample::<Vec3>::wire_size(Vec3::WIRE_SIZE)
        + SensorSample::<Quaternion>::wire_size(Quaternion::WIRE_SIZE);
}
