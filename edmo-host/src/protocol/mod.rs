//! The framed binary protocol spoken by EDMO robots.
//!
//! Frames are delimited by the two-byte header `ED` and footer `MO`; the
//! payload in between is escape-encoded so neither delimiter can occur
//! inside it. The first unescaped payload byte is the packet-type tag, the
//! rest is the tag-specific fixed-layout body.

pub mod framing;
pub mod packets;

pub use framing::{escape, frame, unescape, FrameAssembler};
pub use packets::{decode_reply, Command, Reply};
