//! Link configuration parameters
//!
//! All tunables for the radio link, TOC fetching and the bootloader client.
//! Defaults are the values the protocol was designed around; callers may
//! load overrides from JSON.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::radio::{ADDRESS_LEN, DEFAULT_ADDRESS, MAX_ACK_RETRY_COUNT, Power};

/// Core link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    // --- Radio ---
    /// Radio address of the vehicle
    pub address: [u8; ADDRESS_LEN],
    /// Transmit power
    pub power: Power,
    /// Auto-retransmit count while connected (the dongle resets to 3)
    pub link_ack_retry_count: u8,

    // --- Scanning ---
    /// Auto-retransmit count while scanning
    pub scan_ack_retry_count: u8,
    /// Pause between per-channel probes (milliseconds)
    pub scan_settle_ms: u64,

    // --- Pump ---
    /// Consecutive unacknowledged exchanges before `LinkEvent::Degraded`
    pub link_failure_threshold: u32,
    /// Consecutive empty acks before the pump starts idling
    pub idle_backoff_after: u32,
    /// How long an idling pump waits for outbound data (milliseconds)
    pub idle_wait_ms: u64,
    /// Stack size of the pump thread (KiB)
    pub pump_stack_kb: usize,

    // --- TOC ---
    /// Re-send the pending TOC request after this long without a reply.
    /// `None` leaves retransmission entirely to the link.
    pub toc_resend_ms: Option<u64>,
    /// Re-sends allowed per request before the fetch reports a stall
    pub toc_max_resends: u32,

    // --- Bootloader ---
    /// How long `Bootloader::scan` looks for a bootloader (milliseconds)
    pub bootloader_scan_timeout_ms: u64,
    /// Wait per bootloader request (milliseconds)
    pub bootloader_reply_timeout_ms: u64,
    /// Attempts per bootloader request
    pub bootloader_retries: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            // Radio
            address: DEFAULT_ADDRESS,
            power: Power::ZerodBm,
            link_ack_retry_count: 10,

            // Scanning
            scan_ack_retry_count: 1,
            scan_settle_ms: 20,

            // Pump
            link_failure_threshold: 10,
            idle_backoff_after: 10,
            idle_wait_ms: 10,
            pump_stack_kb: 256,

            // TOC
            toc_resend_ms: None,
            toc_max_resends: 10,

            // Bootloader
            bootloader_scan_timeout_ms: 10_000,
            bootloader_reply_timeout_ms: 100,
            bootloader_retries: 10,
        }
    }
}

impl LinkConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|_| ConfigError::Invalid("malformed config JSON"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the radio or the protocols cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link_ack_retry_count > MAX_ACK_RETRY_COUNT
            || self.scan_ack_retry_count > MAX_ACK_RETRY_COUNT
        {
            return Err(ConfigError::Invalid("ack retry count must be in 0..=15"));
        }
        if self.link_failure_threshold == 0 {
            return Err(ConfigError::Invalid("link_failure_threshold must be > 0"));
        }
        if self.pump_stack_kb == 0 {
            return Err(ConfigError::Invalid("pump_stack_kb must be > 0"));
        }
        if self.bootloader_retries == 0 || self.bootloader_reply_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "bootloader needs at least one attempt with a non-zero timeout",
            ));
        }
        if self.toc_resend_ms == Some(0) {
            return Err(ConfigError::Invalid("toc_resend_ms must be > 0"));
        }
        Ok(())
    }
}
