//! Device layer: the per-channel connection state machine, the fused
//! logical device, and the connection manager composing both transports.

pub mod connection;
pub mod fused;
pub mod manager;
