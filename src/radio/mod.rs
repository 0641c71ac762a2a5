//! Radio transport abstraction: one frame out, one ack back.
//!
//! ```text
//!  CrtpLink pump ──▶ RadioTransport::exchange ──▶ dongle ──▶ vehicle
//!        ▲                                                     │
//!        └──────────────────── Ack (+payload) ◀────────────────┘
//! ```
//!
//! The link is generic over [`RadioTransport`], so tests drive the pump
//! with a scripted transport and the dongle driver ([`Crazyradio`]) is
//! tested against a simulated [`UsbInterface`].

pub mod crazyradio;
pub mod usb;

pub use crazyradio::Crazyradio;
pub use usb::UsbInterface;

use core::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TransportError};

/// Highest radio channel (2400 MHz + channel).
pub const MAX_RADIO_CHANNEL: u8 = 125;

/// Highest auto-retransmit count the radio accepts.
pub const MAX_ACK_RETRY_COUNT: u8 = 15;

/// Longest ack payload the radio can be told to expect.
pub const MAX_ARD_BYTES: u8 = 32;

/// Radio address length in bytes.
pub const ADDRESS_LEN: usize = 5;

/// Address the dongle uses after power-up.
pub const DEFAULT_ADDRESS: [u8; ADDRESS_LEN] = [0xE7; ADDRESS_LEN];

// ── Radio parameters ──────────────────────────────────────────

/// Over-the-air data rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Datarate {
    Kbps250 = 0,
    Mbps1 = 1,
    Mbps2 = 2,
}

impl Datarate {
    pub const ALL: [Self; 3] = [Self::Kbps250, Self::Mbps1, Self::Mbps2];

    pub fn from_code(code: u8) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(Self::Kbps250),
            1 => Ok(Self::Mbps1),
            2 => Ok(Self::Mbps2),
            _ => Err(ConfigError::Invalid("datarate must be 0 (250K), 1 (1M) or 2 (2M)")),
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Transmit power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Power {
    Minus18dBm = 0,
    Minus12dBm = 1,
    Minus6dBm = 2,
    ZerodBm = 3,
}

/// How long the radio waits for an ack before retransmitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryDelay {
    /// Fixed delay, quantized to 250 µs steps in [250, 4000] µs.
    Micros(u32),
    /// Delay derived by the radio from the expected ack payload length.
    AckPayloadBytes(u8),
}

impl RetryDelay {
    /// The ARD register value sent to the dongle.
    ///
    /// `Micros` rounds to the nearest 250 µs step and stores `steps - 1`,
    /// clamped to the 4-bit register (0 → 250 µs, 15 → 4000 µs).
    /// `AckPayloadBytes` sets bit 7 and carries the byte count.
    pub fn register(self) -> u16 {
        match self {
            Self::Micros(us) => {
                let steps = us.saturating_add(125) / 250;
                steps.saturating_sub(1).min(0xF) as u16
            }
            Self::AckPayloadBytes(n) => 0x80 | u16::from(n),
        }
    }
}

/// Full radio configuration, validated before anything reaches the dongle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioConfig {
    pub channel: u8,
    pub datarate: Datarate,
    pub address: [u8; ADDRESS_LEN],
    pub power: Power,
    pub ack_retry_count: u8,
    pub retry_delay: RetryDelay,
}

impl RadioConfig {
    pub fn new(channel: u8, datarate: Datarate) -> Self {
        Self {
            channel,
            datarate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_channel(self.channel)?;
        validate_ack_retry_count(self.ack_retry_count)?;
        if let RetryDelay::AckPayloadBytes(n) = self.retry_delay {
            if n > MAX_ARD_BYTES {
                return Err(ConfigError::Invalid("ack payload length must be in 0..=32"));
            }
        }
        Ok(())
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: 2,
            datarate: Datarate::Mbps2,
            address: DEFAULT_ADDRESS,
            power: Power::ZerodBm,
            ack_retry_count: 3,
            retry_delay: RetryDelay::AckPayloadBytes(MAX_ARD_BYTES),
        }
    }
}

pub fn validate_channel(channel: u8) -> Result<(), ConfigError> {
    if channel > MAX_RADIO_CHANNEL {
        return Err(ConfigError::Invalid("channel must be in 0..=125"));
    }
    Ok(())
}

pub fn validate_ack_retry_count(count: u8) -> Result<(), ConfigError> {
    if count > MAX_ACK_RETRY_COUNT {
        return Err(ConfigError::Invalid("ack retry count must be in 0..=15"));
    }
    Ok(())
}

pub fn validate_address(address: &[u8]) -> Result<[u8; ADDRESS_LEN], ConfigError> {
    address
        .try_into()
        .map_err(|_| ConfigError::Invalid("radio address must be 5 bytes long"))
}

// ── Ack ───────────────────────────────────────────────────────

/// The single reply produced by one radio exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ack {
    /// The vehicle acknowledged the frame.
    pub acknowledged: bool,
    /// The radio detected carrier power on the channel.
    pub power_detected: bool,
    /// Retransmissions the radio needed (0..=15).
    pub retry_count: u8,
    /// Ack payload, if the vehicle piggybacked data on the ack.
    pub payload: Option<Vec<u8>>,
}

impl Ack {
    /// Link quality in percent derived from the retry count.
    pub fn quality(&self) -> u8 {
        (10 - self.retry_count.min(10)) * 10
    }
}

/// A channel/datarate pair on which a vehicle answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionData {
    pub channel: u8,
    pub datarate: Datarate,
}

// ── Transport trait ───────────────────────────────────────────

/// The physical radio: configuration plus one atomic request/ack exchange.
///
/// Implementations are owned by exactly one pump thread while a link is
/// connected, hence the `Send` bound at the link level.
pub trait RadioTransport {
    /// Apply a full configuration. Invalid values fail before any transfer.
    fn configure(&mut self, config: &RadioConfig) -> Result<(), crate::Error>;

    /// Send exactly one frame and block for its ack.
    ///
    /// `Ok(None)` means the exchange produced no ack at all (the transfer
    /// went nowhere but the dongle is still there). `Err` means the
    /// transport is gone.
    fn exchange(&mut self, frame: &[u8]) -> Result<Option<Ack>, TransportError>;

    /// Probe every channel in `channels` at `datarate` and return, in
    /// ascending order, those on which a vehicle acknowledged.
    fn scan_channels(
        &mut self,
        channels: RangeInclusive<u8>,
        datarate: Datarate,
    ) -> Result<Vec<u8>, crate::Error>;

    /// Release the underlying device. Idempotent.
    fn close(&mut self);
}
