//! Oscillator parameter and state records.
//!
//! Every oscillator on an EDMO robot produces a sinusoidal target position
//! shaped by four parameters. The device reports those parameters back
//! together with the oscillator's instantaneous phase.

use serde::{Deserialize, Serialize};

/// Host-side default for the `offset` parameter, in degrees.
pub const DEFAULT_OFFSET: f32 = 90.0;

/// The four host-settable parameters of one oscillator.
///
/// On the wire this is four consecutive little-endian IEEE-754 `f32` values
/// in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OscillatorParams {
    /// Oscillation frequency in Hz. Uniform across all oscillators of a
    /// session.
    pub frequency: f32,
    /// Oscillation amplitude in degrees.
    pub amplitude: f32,
    /// Center offset in degrees.
    pub offset: f32,
    /// Phase shift relative to the other oscillators, in degrees.
    pub phase_shift: f32,
}

impl OscillatorParams {
    /// Byte length of the wire encoding.
    pub const WIRE_SIZE: usize = 16;
}

impl Default for OscillatorParams {
    fn default() -> Self {
        Self {
            frequency: 0.0,
            amplitude: 0.0,
            offset: DEFAULT_OFFSET,
            phase_shift: 0.0,
        }
    }
}

/// Parameters plus the instantaneous phase the device reported.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OscillatorState {
    /// The parameter set the device is currently running.
    pub params: OscillatorParams,
    /// Instantaneous oscillator phase, appended as a fifth `f32` on the wire.
    pub phase: f32,
}

impl OscillatorState {
    /// Byte length of the wire encoding.
    pub const WIRE_SIZE: usize = OscillatorParams::WIRE_SIZE + 4;
}
