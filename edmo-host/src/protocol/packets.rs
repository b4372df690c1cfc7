//! Fixed-layout packet (de)serialization.
//!
//! Everything on the wire is little-endian; floats are IEEE-754 binary32.
//! The host only ever encodes commands and only ever decodes replies, so the
//! two directions are separate types. A body whose length does not exactly
//! match the layout of its declared tag is malformed.

use edmo_types::{
    DeviceIdentity, ImuSample, OscillatorParams, OscillatorState, PacketKind, ProtocolError,
    Quaternion, SensorSample, Vec3,
};
use nom::bytes::complete::{tag, take, take_till};
use nom::multi::count;
use nom::number::complete::{le_f32, le_u16, le_u32, u8 as nom_u8};
use nom::IResult;
use uuid::Uuid;

use super::framing;

/// A typed command written by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Request identification; the body is the host's 128-bit lock key.
    Identify {
        /// Process-stable lock key, opaque to the device.
        lock_key: Uuid,
    },
    /// Mark the beginning of a session, seeding the device clock reference.
    SessionStart {
        /// The host's last known device time, zero on a first bind.
        time: u32,
    },
    /// Ask the device for its current time.
    GetTime,
    /// Write the parameter set of one oscillator.
    UpdateOscillator {
        /// Oscillator index.
        index: u8,
        /// Parameters to run.
        params: OscillatorParams,
    },
    /// Mark the end of a session.
    SessionEnd,
}

impl Command {
    /// The packet-type tag this command carries.
    pub fn kind(&self) -> PacketKind {
        match self {
            Command::Identify { .. } => PacketKind::Identify,
            Command::SessionStart { .. } => PacketKind::SessionStart,
            Command::GetTime => PacketKind::GetTime,
            Command::UpdateOscillator { .. } => PacketKind::UpdateOscillator,
            Command::SessionEnd => PacketKind::SessionEnd,
        }
    }

    /// Serialize to an unescaped payload (tag byte plus body).
    pub fn payload(&self) -> Vec<u8> {
        let mut out = vec![self.kind().tag()];
        match self {
            Command::Identify { lock_key } => out.extend_from_slice(lock_key.as_bytes()),
            Command::SessionStart { time } => out.extend_from_slice(&time.to_le_bytes()),
            Command::GetTime | Command::SessionEnd => {}
            Command::UpdateOscillator { index, params } => {
                out.push(*index);
                put_params(&mut out, params);
            }
        }
        out
    }

    /// Serialize to a complete on-wire frame.
    pub fn encode(&self) -> Vec<u8> {
        framing::frame(&self.payload())
    }
}

/// A typed reply decoded from a device frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Identification reply.
    Identification(DeviceIdentity),
    /// Device time report.
    Time(u32),
    /// Instantaneous state of one oscillator.
    MotorData {
        /// Oscillator index.
        index: u8,
        /// Reported state.
        state: OscillatorState,
    },
    /// Inertial-measurement aggregate.
    ImuData(ImuSample),
    /// Combined report: time, every oscillator state, IMU aggregate.
    AllData {
        /// Device time.
        time: u32,
        /// One state per oscillator, index order.
        states: Vec<OscillatorState>,
        /// IMU aggregate.
        imu: ImuSample,
    },
}

/// Decode an unescaped payload into a typed reply.
///
/// `oscillator_count` is the host's cached count for the originating device;
/// the combined report's state block is sized by it. Trailing bytes after
/// the declared layout are malformed.
pub fn decode_reply(payload: &[u8], oscillator_count: usize) -> Result<Reply, ProtocolError> {
    let (&tag_byte, body) = payload
        .split_first()
        .ok_or(ProtocolError::MalformedPayload)?;
    let kind = PacketKind::try_from(tag_byte)?;
    let parsed: IResult<&[u8], Reply> = match kind {
        PacketKind::Identify => {
            identification(body).map(|(rest, id)| (rest, Reply::Identification(id)))
        }
        PacketKind::GetTime => le_u32(body).map(|(rest, time)| (rest, Reply::Time(time))),
        PacketKind::SendMotorData => motor_data(body),
        PacketKind::SendImuData => imu_sample(body).map(|(rest, imu)| (rest, Reply::ImuData(imu))),
        PacketKind::SendAllData => all_data(body, oscillator_count),
        // Host-to-device tags never arrive inbound.
        PacketKind::SessionStart | PacketKind::UpdateOscillator | PacketKind::SessionEnd => {
            return Err(ProtocolError::MalformedPayload);
        }
    };
    match parsed {
        Ok(([], reply)) => Ok(reply),
        _ => Err(ProtocolError::MalformedPayload),
    }
}

fn put_params(out: &mut Vec<u8>, params: &OscillatorParams) {
    out.extend_from_slice(&params.frequency.to_le_bytes());
    out.extend_from_slice(&params.amplitude.to_le_bytes());
    out.extend_from_slice(&params.offset.to_le_bytes());
    out.extend_from_slice(&params.phase_shift.to_le_bytes());
}

fn identification(input: &[u8]) -> IResult<&[u8], DeviceIdentity> {
    let (input, name) = take_till(|b| b == 0)(input)?;
    let (input, _) = tag(&[0u8][..])(input)?;
    let (input, oscillator_count) = nom_u8(input)?;
    let (input, arm_hues) = count(le_u16, oscillator_count as usize)(input)?;
    let (input, locked) = nom_u8(input)?;
    // The identifier is NUL-terminated ASCII; an empty one is malformed.
    let identifier = std::str::from_utf8(name)
        .ok()
        .filter(|s| !s.is_empty() && s.is_ascii())
        .ok_or_else(|| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
        })?;
    Ok((
        input,
        DeviceIdentity {
            identifier: identifier.to_owned(),
            oscillator_count,
            arm_hues,
            is_locked: locked != 0,
        },
    ))
}

fn oscillator_params(input: &[u8]) -> IResult<&[u8], OscillatorParams> {
    let (input, frequency) = le_f32(input)?;
    let (input, amplitude) = le_f32(input)?;
    let (input, offset) = le_f32(input)?;
    let (input, phase_shift) = le_f32(input)?;
    Ok((
        input,
        OscillatorParams {
            frequency,
            amplitude,
            offset,
            phase_shift,
        },
    ))
}

fn oscillator_state(input: &[u8]) -> IResult<&[u8], OscillatorState> {
    let (input, params) = oscillator_params(input)?;
    let (input, phase) = le_f32(input)?;
    Ok((input, OscillatorState { params, phase }))
}

fn motor_data(input: &[u8]) -> IResult<&[u8], Reply> {
    let (input, index) = nom_u8(input)?;
    let (input, state) = oscillator_state(input)?;
    Ok((input, Reply::MotorData { index, state }))
}

fn vec3(input: &[u8]) -> IResult<&[u8], Vec3> {
    let (input, x) = le_f32(input)?;
    let (input, y) = le_f32(input)?;
    let (input, z) = le_f32(input)?;
    Ok((input, Vec3 { x, y, z }))
}

fn quaternion(input: &[u8]) -> IResult<&[u8], Quaternion> {
    let (input, x) = le_f32(input)?;
    let (input, y) = le_f32(input)?;
    let (input, z) = le_f32(input)?;
    let (input, w) = le_f32(input)?;
    Ok((input, Quaternion { x, y, z, w }))
}

fn sensor_vec3(input: &[u8]) -> IResult<&[u8], SensorSample<Vec3>> {
    let (input, timestamp) = le_u32(input)?;
    let (input, accuracy) = nom_u8(input)?;
    let (input, _) = take(3usize)(input)?;
    let (input, data) = vec3(input)?;
    Ok((
        input,
        SensorSample {
            timestamp,
            accuracy,
            data,
        },
    ))
}

fn sensor_quaternion(input: &[u8]) -> IResult<&[u8], SensorSample<Quaternion>> {
    let (input, timestamp) = le_u32(input)?;
    let (input, accuracy) = nom_u8(input)?;
    let (input, _) = take(3usize)(input)?;
    let (input, data) = quaternion(input)?;
    Ok((
        input,
        SensorSample {
            timestamp,
            accuracy,
            data,
        },
    ))
}

fn imu_sample(input: &[u8]) -> IResult<&[u8], ImuSample> {
    let (input, gyroscope) = sensor_vec3(input)?;
    let (input, accelerometer) = sensor_vec3(input)?;
    let (input, magnetic_field) = sensor_vec3(input)?;
    let (input, gravity) = sensor_vec3(input)?;
    let (input, rotation) = sensor_quaternion(input)?;
    Ok((
        input,
        ImuSample {
            gyroscope,
            accelerometer,
            magnetic_field,
            gravity,
            rotation,
        },
    ))
}

fn all_data(input: &[u8], oscillator_count: usize) -> IResult<&[u8], Reply> {
    let (input, time) = le_u32(input)?;
    let (input, states) = count(oscillator_state, oscillator_count)(input)?;
    let (input, imu) = imu_sample(input)?;
    Ok((input, Reply::AllData { time, states, imu }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(seed: f32) -> OscillatorState {
        OscillatorState {
            params: OscillatorParams {
                frequency: seed,
                amplitude: seed + 1.0,
                offset: seed + 2.0,
                phase_shift: seed + 3.0,
            },
            phase: seed + 4.0,
        }
    }

    fn encode_state(out: &mut Vec<u8>, state: &OscillatorState) {
        put_params(out, &state.params);
        out.extend_from_slice(&state.phase.to_le_bytes());
    }

    fn encode_sensor(out: &mut Vec<u8>, timestamp: u32, accuracy: u8, floats: &[f32]) {
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.push(accuracy);
        out.extend_from_slice(&[0, 0, 0]);
        for f in floats {
            out.extend_from_slice(&f.to_le_bytes());
        }
    }

    fn sample_imu_bytes() -> Vec<u8> {
        let mut body = Vec::new();
        encode_sensor(&mut body, 10, 3, &[1.0, 2.0, 3.0]);
        encode_sensor(&mut body, 11, 3, &[4.0, 5.0, 6.0]);
        encode_sensor(&mut body, 12, 2, &[7.0, 8.0, 9.0]);
        encode_sensor(&mut body, 13, 3, &[0.0, 0.0, 9.81]);
        encode_sensor(&mut body, 14, 3, &[0.0, 0.0, 0.0, 1.0]);
        body
    }

    #[test]
    fn identify_command_carries_the_lock_key() {
        let lock_key = Uuid::from_bytes([7; 16]);
        let payload = Command::Identify { lock_key }.payload();
        assert_eq!(payload[0], 0);
        assert_eq!(&payload[1..], lock_key.as_bytes());
    }

    #[test]
    fn update_oscillator_layout() {
        let params = OscillatorParams {
            frequency: 1.5,
            amplitude: 20.0,
            offset: 90.0,
            phase_shift: 180.0,
        };
        let payload = Command::UpdateOscillator { index: 2, params }.payload();
        assert_eq!(payload.len(), 2 + OscillatorParams::WIRE_SIZE);
        assert_eq!(payload[0], 3);
        assert_eq!(payload[1], 2);
        assert_eq!(&payload[2..6], &1.5f32.to_le_bytes());
    }

    #[test]
    fn session_commands_layout() {
        assert_eq!(
            Command::SessionStart { time: 0x0102_0304 }.payload(),
            [1, 0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(Command::GetTime.payload(), [2]);
        assert_eq!(Command::SessionEnd.payload(), [6]);
    }

    #[test]
    fn identification_reply_decodes() {
        let payload = [
            0x00, b'S', b'n', b'a', b'k', b'e', b'1', 0x00, 0x04, 0x00, 0x00, 0x78, 0x00, 0xF0,
            0x00, 0x68, 0x01, 0x00,
        ];
        let reply = decode_reply(&payload, 0).unwrap();
        let Reply::Identification(id) = reply else {
            panic!("expected identification, got {reply:?}");
        };
        assert_eq!(id.identifier, "Snake1");
        assert_eq!(id.oscillator_count, 4);
        assert_eq!(id.arm_hues, [0, 120, 240, 360]);
        assert!(!id.is_locked);
    }

    #[test]
    fn identification_with_empty_identifier_is_malformed() {
        let payload = [0x00, 0x00, 0x01, 0x10, 0x00, 0x00];
        assert_eq!(
            decode_reply(&payload, 0),
            Err(ProtocolError::MalformedPayload)
        );
    }

    #[test]
    fn identification_with_short_hue_table_is_malformed() {
        // Declares four hues but carries two.
        let payload = [0x00, b'A', 0x00, 0x04, 0x00, 0x00, 0x78, 0x00, 0x00];
        assert_eq!(
            decode_reply(&payload, 0),
            Err(ProtocolError::MalformedPayload)
        );
    }

    #[test]
    fn time_reply_decodes() {
        let reply = decode_reply(&[0x02, 0xFF, 0x00, 0x00, 0x00], 0).unwrap();
        assert_eq!(reply, Reply::Time(0xFF));
    }

    #[test]
    fn motor_data_round_trips() {
        let state = sample_state(0.25);
        let mut payload = vec![0x04, 3];
        encode_state(&mut payload, &state);
        assert_eq!(payload.len(), 1 + 1 + OscillatorState::WIRE_SIZE);
        let reply = decode_reply(&payload, 0).unwrap();
        assert_eq!(reply, Reply::MotorData { index: 3, state });
    }

    #[test]
    fn imu_layout_size_and_padding() {
        let body = sample_imu_bytes();
        assert_eq!(body.len(), ImuSample::WIRE_SIZE);
        let mut payload = vec![0x05];
        payload.extend_from_slice(&body);
        let Reply::ImuData(imu) = decode_reply(&payload, 0).unwrap() else {
            panic!("expected imu data");
        };
        assert_eq!(imu.gyroscope.timestamp, 10);
        assert_eq!(imu.gyroscope.data, Vec3 { x: 1.0, y: 2.0, z: 3.0 });
        assert_eq!(imu.gravity.data.z, 9.81);
        assert_eq!(imu.rotation.data.w, 1.0);
    }

    #[test]
    fn all_data_decodes_time_states_and_imu() {
        let states = [sample_state(1.0), sample_state(2.0)];
        let mut payload = vec![69, 0x39, 0x05, 0x00, 0x00];
        for state in &states {
            encode_state(&mut payload, state);
        }
        payload.extend_from_slice(&sample_imu_bytes());
        let Reply::AllData {
            time,
            states: decoded,
            imu,
        } = decode_reply(&payload, 2).unwrap()
        else {
            panic!("expected combined report");
        };
        assert_eq!(time, 1337);
        assert_eq!(decoded, states);
        assert_eq!(imu.accelerometer.data.x, 4.0);
    }

    #[test]
    fn all_data_with_mismatched_count_is_malformed() {
        let mut payload = vec![69, 0, 0, 0, 0];
        encode_state(&mut payload, &sample_state(1.0));
        payload.extend_from_slice(&sample_imu_bytes());
        // The host cached a different oscillator count than the device sent.
        assert_eq!(decode_reply(&payload, 3), Err(ProtocolError::MalformedPayload));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        assert_eq!(
            decode_reply(&[0x02, 0xFF, 0x00, 0x00, 0x00, 0xAA], 0),
            Err(ProtocolError::MalformedPayload)
        );
    }

    #[test]
    fn unknown_tag_is_malformed() {
        assert_eq!(decode_reply(&[0x2A], 0), Err(ProtocolError::MalformedPayload));
        assert_eq!(decode_reply(&[], 0), Err(ProtocolError::MalformedPayload));
    }

    #[test]
    fn outbound_tags_never_decode() {
        assert_eq!(
            decode_reply(&[0x01, 0, 0, 0, 0], 0),
            Err(ProtocolError::MalformedPayload)
        );
    }
}
