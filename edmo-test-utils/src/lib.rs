//! Test utilities for the EDMO host stack: a scriptable mock channel
//! driver and builders for the device-side frames the production code only
//! ever decodes.

pub mod frames;
pub mod mock;

pub use frames::{
    all_data_frame, identification_frame, identification_payload, imu_frame, motor_data_frame,
    sample_imu, sample_state, time_frame,
};
pub use mock::MockChannel;
