//! Crazyradio dongle driver.
//!
//! Configuration goes out as vendor control requests; data goes out as one
//! bulk frame whose bulk reply is the ack:
//!
//! ```text
//! ack byte 0:  retry:4 │ reserved:2 │ power_det:1 │ ack:1
//! ack bytes 1..n: payload piggybacked by the vehicle
//! ```
//!
//! A zero status byte (or an empty read) is the degenerate ack: the dongle
//! gave up after its retries, so it is reported as not acknowledged with
//! the last configured retry count.

use core::ops::RangeInclusive;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::usb::{REQUEST_TYPE_VENDOR_IN, REQUEST_TYPE_VENDOR_OUT, UsbInterface};
use super::{
    ADDRESS_LEN, Ack, DEFAULT_ADDRESS, Datarate, MAX_ARD_BYTES, Power, RadioConfig,
    RadioTransport, RetryDelay, validate_ack_retry_count, validate_address, validate_channel,
};
use crate::config::LinkConfig;
use crate::crtp::NULL_PACKET;
use crate::error::{ConfigError, TransportError};

// ── Vendor requests ───────────────────────────────────────────

pub const SET_RADIO_CHANNEL: u8 = 0x01;
pub const SET_RADIO_ADDRESS: u8 = 0x02;
pub const SET_DATA_RATE: u8 = 0x03;
pub const SET_RADIO_POWER: u8 = 0x04;
pub const SET_RADIO_ARD: u8 = 0x05;
pub const SET_RADIO_ARC: u8 = 0x06;
pub const ACK_ENABLE: u8 = 0x10;
pub const SET_CONT_CARRIER: u8 = 0x20;
pub const SCAN_CHANNELS: u8 = 0x21;
pub const LAUNCH_BOOTLOADER: u8 = 0xFF;

/// Oldest dongle firmware this driver talks to at all.
const MIN_FIRMWARE: f32 = 0.3;

/// Firmware from which address/power/ARC/ARD are configurable.
const FULL_CONFIG_FIRMWARE: f32 = 0.4;

/// Ack read buffer; a full-speed bulk packet.
const ACK_BUF_LEN: usize = 64;

/// Crazyradio USB dongle.
pub struct Crazyradio<U: UsbInterface> {
    usb: U,
    version: f32,
    serial: String,
    /// Last ARC written; reported as the retry count of degenerate acks.
    arc: u8,
    scan_ack_retry_count: u8,
    scan_settle: Duration,
    closed: bool,
}

impl<U: UsbInterface> Crazyradio<U> {
    /// Open the dongle and reset it to its power-up settings.
    pub fn new(usb: U) -> Result<Self, crate::Error> {
        if !usb.is_connected() {
            return Err(TransportError::Unavailable.into());
        }

        let version = usb.firmware_version();
        let serial = usb.serial_number();
        if version < MIN_FIRMWARE {
            error!("Crazyradio firmware {version:.2} is too old, V{MIN_FIRMWARE} required");
        } else if version < FULL_CONFIG_FIRMWARE {
            warn!("Crazyradio firmware {version:.2}: update to V{FULL_CONFIG_FIRMWARE}+");
        }
        info!("Crazyradio {serial} firmware {version:.2}");

        let defaults = LinkConfig::default();
        let mut radio = Self {
            usb,
            version,
            serial,
            arc: 0,
            scan_ack_retry_count: defaults.scan_ack_retry_count,
            scan_settle: Duration::from_millis(defaults.scan_settle_ms),
            closed: false,
        };

        debug!("resetting dongle to power-up settings");
        radio.set_datarate(Datarate::Mbps2)?;
        radio.set_channel(2)?;
        if radio.has_full_config() {
            radio.set_continuous_carrier(false)?;
            radio.set_address(&DEFAULT_ADDRESS)?;
            radio.set_power(Power::ZerodBm)?;
            radio.set_arc(3)?;
            radio.set_ard_bytes(MAX_ARD_BYTES)?;
        }
        Ok(radio)
    }

    /// Open the dongle and take the scan tunables from `config`.
    pub fn with_config(usb: U, config: &LinkConfig) -> Result<Self, crate::Error> {
        let mut radio = Self::new(usb)?;
        radio.scan_ack_retry_count = config.scan_ack_retry_count;
        radio.scan_settle = Duration::from_millis(config.scan_settle_ms);
        Ok(radio)
    }

    pub fn version(&self) -> f32 {
        self.version
    }

    pub fn serial_number(&self) -> &str {
        &self.serial
    }

    fn has_full_config(&self) -> bool {
        self.version >= FULL_CONFIG_FIRMWARE
    }

    fn vendor_setup(&mut self, request: u8, value: u16, data: &[u8]) -> Result<(), TransportError> {
        self.usb
            .control_out(REQUEST_TYPE_VENDOR_OUT, request, value, 0, data)
    }

    // ── Dongle configuration ──────────────────────────────────

    pub fn set_channel(&mut self, channel: u8) -> Result<(), crate::Error> {
        validate_channel(channel)?;
        self.vendor_setup(SET_RADIO_CHANNEL, u16::from(channel), &[])?;
        Ok(())
    }

    pub fn set_address(&mut self, address: &[u8]) -> Result<(), crate::Error> {
        let address: [u8; ADDRESS_LEN] = validate_address(address)?;
        self.vendor_setup(SET_RADIO_ADDRESS, 0, &address)?;
        Ok(())
    }

    pub fn set_datarate(&mut self, datarate: Datarate) -> Result<(), crate::Error> {
        self.vendor_setup(SET_DATA_RATE, u16::from(datarate.code()), &[])?;
        Ok(())
    }

    pub fn set_power(&mut self, power: Power) -> Result<(), crate::Error> {
        self.vendor_setup(SET_RADIO_POWER, power as u16, &[])?;
        Ok(())
    }

    /// Auto-retransmit count.
    pub fn set_arc(&mut self, count: u8) -> Result<(), crate::Error> {
        validate_ack_retry_count(count)?;
        self.vendor_setup(SET_RADIO_ARC, u16::from(count), &[])?;
        self.arc = count;
        Ok(())
    }

    /// Auto-retransmit delay.
    pub fn set_retry_delay(&mut self, delay: RetryDelay) -> Result<(), crate::Error> {
        if let RetryDelay::AckPayloadBytes(n) = delay {
            if n > MAX_ARD_BYTES {
                return Err(ConfigError::Invalid("ack payload length must be in 0..=32").into());
            }
        }
        self.vendor_setup(SET_RADIO_ARD, delay.register(), &[])?;
        Ok(())
    }

    pub fn set_ard_bytes(&mut self, nbytes: u8) -> Result<(), crate::Error> {
        self.set_retry_delay(RetryDelay::AckPayloadBytes(nbytes))
    }

    /// Emit an unmodulated carrier (RF test mode). No packets go out while on.
    pub fn set_continuous_carrier(&mut self, active: bool) -> Result<(), crate::Error> {
        self.vendor_setup(SET_CONT_CARRIER, u16::from(active), &[])?;
        Ok(())
    }

    /// Reboot the dongle into its own USB bootloader.
    pub fn launch_bootloader(&mut self) -> Result<(), crate::Error> {
        self.vendor_setup(LAUNCH_BOOTLOADER, 0, &[])?;
        Ok(())
    }

    // ── Scanning ──────────────────────────────────────────────

    fn firmware_scan(&mut self, channels: &RangeInclusive<u8>) -> Result<Vec<u8>, crate::Error> {
        debug!("fast scan {}..={}", channels.start(), channels.end());
        self.usb.control_out(
            REQUEST_TYPE_VENDOR_OUT,
            SCAN_CHANNELS,
            u16::from(*channels.start()),
            u16::from(*channels.end()),
            &NULL_PACKET,
        )?;
        let mut found = [0u8; ACK_BUF_LEN];
        let n = self
            .usb
            .control_in(REQUEST_TYPE_VENDOR_IN, SCAN_CHANNELS, 0, 0, &mut found)?;
        let mut result: Vec<u8> = found[..n.min(ACK_BUF_LEN)]
            .iter()
            .copied()
            .filter(|ch| channels.contains(ch))
            .collect();
        result.sort_unstable();
        result.dedup();
        Ok(result)
    }

    fn linear_scan(&mut self, channels: RangeInclusive<u8>) -> Result<Vec<u8>, crate::Error> {
        debug!("slow scan {}..={}", channels.start(), channels.end());
        let mut result = Vec::new();
        for channel in channels {
            self.set_channel(channel)?;
            if let Some(ack) = self.exchange(&NULL_PACKET)? {
                if ack.acknowledged {
                    debug!("found channel {channel}");
                    result.push(channel);
                }
            }
            // Back-to-back probes give false negatives on some dongles.
            if !self.scan_settle.is_zero() {
                std::thread::sleep(self.scan_settle);
            }
        }
        Ok(result)
    }
}

/// Decode the bulk reply of one exchange.
fn parse_ack(buf: &[u8], last_arc: u8) -> Ack {
    match buf.split_first() {
        Some((&status, data)) if status != 0 => Ack {
            acknowledged: status & 0x01 != 0,
            power_detected: status & 0x02 != 0,
            retry_count: status >> 4,
            payload: (!data.is_empty()).then(|| data.to_vec()),
        },
        _ => Ack {
            acknowledged: false,
            power_detected: false,
            retry_count: last_arc,
            payload: None,
        },
    }
}

impl<U: UsbInterface> RadioTransport for Crazyradio<U> {
    fn configure(&mut self, config: &RadioConfig) -> Result<(), crate::Error> {
        config.validate()?;
        self.set_channel(config.channel)?;
        self.set_datarate(config.datarate)?;
        if self.has_full_config() {
            self.set_address(&config.address)?;
            self.set_power(config.power)?;
            self.set_arc(config.ack_retry_count)?;
            self.set_retry_delay(config.retry_delay)?;
        } else {
            warn!("Crazyradio firmware < 0.4: address, power and retries left at defaults");
        }
        Ok(())
    }

    fn exchange(&mut self, frame: &[u8]) -> Result<Option<Ack>, TransportError> {
        if self.closed || !self.usb.is_connected() {
            return Err(TransportError::Unavailable);
        }
        let mut buf = [0u8; ACK_BUF_LEN];
        match self.usb.bulk_exchange(frame, &mut buf) {
            Ok(n) => Ok(Some(parse_ack(&buf[..n.min(ACK_BUF_LEN)], self.arc))),
            Err(TransportError::Unavailable) => Err(TransportError::Unavailable),
            Err(e) => {
                debug!("bulk exchange produced no ack: {e}");
                Ok(None)
            }
        }
    }

    fn scan_channels(
        &mut self,
        channels: RangeInclusive<u8>,
        datarate: Datarate,
    ) -> Result<Vec<u8>, crate::Error> {
        validate_channel(*channels.end())?;
        if self.closed || !self.usb.is_connected() {
            warn!("Crazyradio not attached");
            return Err(TransportError::Unavailable.into());
        }
        self.set_datarate(datarate)?;
        if self.has_full_config() {
            self.set_arc(self.scan_ack_retry_count)?;
        }
        if self.usb.supports_fw_scan() {
            self.firmware_scan(&channels)
        } else {
            self.linear_scan(channels)
        }
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("releasing Crazyradio {}", self.serial);
            self.usb.release();
            self.closed = true;
        }
    }
}

impl<U: UsbInterface> Drop for Crazyradio<U> {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────
