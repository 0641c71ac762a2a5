//! CRTP packet model.
//!
//! Every exchange with the vehicle is one CRTP frame: a single header byte
//! packing port and channel, followed by up to [`MAX_PAYLOAD`] payload bytes.
//!
//! ```text
//! ┌───────────────────────────────┬──────────────────────┐
//! │ Header (1B)                   │ Payload (0..30 B)    │
//! │ port:4 │ reserved:2 │ chan:2  │                      │
//! └───────────────────────────────┴──────────────────────┘
//! ```

pub mod codec;

use heapless::Vec;

use crate::error::CodecError;

/// Largest payload carried by one frame.
pub const MAX_PAYLOAD: usize = 30;

/// Highest valid channel number (2 bits).
pub const MAX_CHANNEL: u8 = 3;

/// Highest valid port number (4 bits).
pub const MAX_PORT: u8 = 15;

/// The idle probe sent whenever the outbound queue is empty.
pub const NULL_PACKET: [u8; 1] = [0xFF];

/// Well-known CRTP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CrtpPort {
    Console = 0,
    Parameters = 2,
    Commander = 3,
    Memory = 4,
    Logging = 5,
    Localization = 6,
    GenericSetpoint = 7,
    Platform = 13,
    Debug = 14,
    /// Link control; also carries bootloader traffic on channel 3.
    LinkControl = 15,
}

impl CrtpPort {
    pub const fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(port: u8) -> Option<Self> {
        match port {
            0 => Some(Self::Console),
            2 => Some(Self::Parameters),
            3 => Some(Self::Commander),
            4 => Some(Self::Memory),
            5 => Some(Self::Logging),
            6 => Some(Self::Localization),
            7 => Some(Self::GenericSetpoint),
            13 => Some(Self::Platform),
            14 => Some(Self::Debug),
            15 => Some(Self::LinkControl),
            _ => None,
        }
    }
}

/// One CRTP packet.
///
/// Immutable once queued; the receiving side consumes it exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    port: u8,
    channel: u8,
    payload: Vec<u8, MAX_PAYLOAD>,
}

impl Packet {
    /// Build a packet, masking `port` to 4 bits and `channel` to 2 bits.
    ///
    /// Fails only when the payload exceeds the MTU.
    pub fn new(port: u8, channel: u8, payload: &[u8]) -> Result<Self, CodecError> {
        let payload =
            Vec::from_slice(payload).map_err(|()| CodecError::PayloadTooLong(payload.len()))?;
        Ok(Self {
            port: port & MAX_PORT,
            channel: channel & MAX_CHANNEL,
            payload,
        })
    }

    /// Build a packet addressed to a well-known port.
    pub fn on(port: CrtpPort, channel: u8, payload: &[u8]) -> Result<Self, CodecError> {
        Self::new(port.number(), channel, payload)
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The packed header byte: high nibble port, low two bits channel.
    pub fn header(&self) -> u8 {
        (self.port << 4) | self.channel
    }
}
