//! Protocol and admission error kinds.
//!
//! Protocol-level decode errors never propagate past the connection layer;
//! the framed protocol is self-synchronizing, so a malformed body surfaces
//! as an `unknown_packet` event and decoding continues with the next frame.
//! Admission errors are contractual return values of the session layer.

use thiserror::Error;

/// Errors raised while decoding a frame payload.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload length or content does not match the declared packet layout.
    #[error("payload does not match the declared packet layout")]
    MalformedPayload,
}

/// Errors returned when a user attempts to join a session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The session has been closed and will never re-open.
    #[error("session has been closed")]
    SessionClosed,
    /// Every controller slot of the session is taken.
    #[error("session has no free controller slot")]
    SessionFull,
    /// The identifier is not known to the session manager.
    #[error("no device with identifier {0:?} is known")]
    NoSuchSession(String),
    /// The candidate device advertises another host's soft lock.
    #[error("device {0:?} is locked by another host")]
    LockedByOtherHost(String),
}
