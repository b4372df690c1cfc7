//! Builders for device-side frames.
//!
//! The production codec only decodes these, so tests hand-encode them here,
//! byte for byte as a robot would.

use edmo_host::protocol::framing;
use edmo_types::{ImuSample, OscillatorState, Quaternion, SensorSample, Vec3};

/// Unescaped identification reply payload.
pub fn identification_payload(identifier: &str, hues: &[u16], locked: bool) -> Vec<u8> {
    let mut payload = vec![0u8];
    payload.extend_from_slice(identifier.as_bytes());
    payload.push(0);
    payload.push(hues.len() as u8);
    for hue in hues {
        payload.extend_from_slice(&hue.to_le_bytes());
    }
    payload.push(locked as u8);
    payload
}

/// Framed identification reply.
pub fn identification_frame(identifier: &str, hues: &[u16], locked: bool) -> Vec<u8> {
    framing::frame(&identification_payload(identifier, hues, locked))
}

/// Framed device time report.
pub fn time_frame(time: u32) -> Vec<u8> {
    let mut payload = vec![2u8];
    payload.extend_from_slice(&time.to_le_bytes());
    framing::frame(&payload)
}

/// Framed single-oscillator state report.
pub fn motor_data_frame(index: u8, state: &OscillatorState) -> Vec<u8> {
    let mut payload = vec![4u8, index];
    push_state(&mut payload, state);
    framing::frame(&payload)
}

/// Framed IMU aggregate report.
pub fn imu_frame(imu: &ImuSample) -> Vec<u8> {
    let mut payload = vec![5u8];
    push_imu(&mut payload, imu);
    framing::frame(&payload)
}

/// Framed combined report: time, every oscillator state, IMU aggregate.
pub fn all_data_frame(time: u32, states: &[OscillatorState], imu: &ImuSample) -> Vec<u8> {
    let mut payload = vec![69u8];
    payload.extend_from_slice(&time.to_le_bytes());
    for state in states {
        push_state(&mut payload, state);
    }
    push_imu(&mut payload, imu);
    framing::frame(&payload)
}

/// A recognizable oscillator state derived from a seed value.
pub fn sample_state(seed: f32) -> OscillatorState {
    OscillatorState {
        params: edmo_types::OscillatorParams {
            frequency: seed,
            amplitude: seed + 1.0,
            offset: seed + 2.0,
            phase_shift: seed + 3.0,
        },
        phase: seed + 4.0,
    }
}

/// A recognizable IMU aggregate.
pub fn sample_imu() -> ImuSample {
    ImuSample {
        gyroscope: sensor(1, 3, Vec3 { x: 0.1, y: 0.2, z: 0.3 }),
        accelerometer: sensor(2, 3, Vec3 { x: 1.0, y: 2.0, z: 3.0 }),
        magnetic_field: sensor(3, 2, Vec3 { x: 10.0, y: 20.0, z: 30.0 }),
        gravity: sensor(4, 3, Vec3 { x: 0.0, y: 0.0, z: 9.81 }),
        rotation: SensorSample {
            timestamp: 5,
            accuracy: 3,
            data: Quaternion {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 1.0,
            },
        },
    }
}

fn sensor(timestamp: u32, accuracy: u8, data: Vec3) -> SensorSample<Vec3> {
    SensorSample {
        timestamp,
        accuracy,
        data,
    }
}

fn push_state(out: &mut Vec<u8>, state: &OscillatorState) {
    out.extend_from_slice(&state.params.frequency.to_le_bytes());
    out.extend_from_slice(&state.params.amplitude.to_le_bytes());
    out.extend_from_slice(&state.params.offset.to_le_bytes());
    out.extend_from_slice(&state.params.phase_shift.to_le_bytes());
    out.extend_from_slice(&state.phase.to_le_bytes());
}

fn push_sensor_prefix(out: &mut Vec<u8>, timestamp: u32, accuracy: u8) {
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.push(accuracy);
    out.extend_from_slice(&[0, 0, 0]);
}

fn push_imu(out: &mut Vec<u8>, imu: &ImuSample) {
    for sample in [
        &imu.gyroscope,
        &imu.accelerometer,
        &imu.magnetic_field,
        &imu.gravity,
    ] {
        push_sensor_prefix(out, sample.timestamp, sample.accuracy);
        out.extend_from_slice(&sample.data.x.to_le_bytes());
        out.extend_from_slice(&sample.data.y.to_le_bytes());
        out.extend_from_slice(&sample.data.z.to_le_bytes());
    }
    push_sensor_prefix(out, imu.rotation.timestamp, imu.rotation.accuracy);
    out.extend_from_slice(&imu.rotation.data.x.to_le_bytes());
    out.extend_from_slice(&imu.rotation.data.y.to_le_bytes());
    out.extend_from_slice(&imu.rotation.data.z.to_le_bytes());
    out.extend_from_slice(&imu.rotation.data.w.to_le_bytes());
}
