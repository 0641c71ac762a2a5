//! Fixed-header frame codec.
//!
//! Wire format:
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ Header (1B)  │ Payload (N B, N <= 30)   │
//! │ port<<4|chan │ copied as-is             │
//! └──────────────┴──────────────────────────┘
//! ```
//!
//! Unlike a byte-stream codec there is no length prefix: the radio delivers
//! whole frames, one per ack, so every decode sees exactly one packet.
//! Reserved header bits are written as zero and ignored on decode.

use heapless::Vec;

use super::{MAX_CHANNEL, MAX_PAYLOAD, Packet};
use crate::error::CodecError;

/// Largest encoded frame: header plus a full payload.
pub const MAX_FRAME: usize = MAX_PAYLOAD + 1;

/// Encode a packet into its wire frame.
pub fn encode(packet: &Packet) -> Vec<u8, MAX_FRAME> {
    let mut frame = Vec::new();
    // Capacity is MAX_PAYLOAD + 1 and Packet guarantees payload <= MAX_PAYLOAD.
    let _ = frame.push(packet.header());
    let _ = frame.extend_from_slice(packet.payload());
    frame
}

/// Decode one wire frame. Exact inverse of [`encode`].
pub fn decode(frame: &[u8]) -> Result<Packet, CodecError> {
    let (&header, payload) = frame.split_first().ok_or(CodecError::Empty)?;
    Packet::new(header >> 4, header & MAX_CHANNEL, payload)
}
