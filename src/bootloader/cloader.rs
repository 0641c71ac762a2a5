//! Bootloader command client.
//!
//! Request/reply over a [`Link`] on the link-control port, channel 3:
//!
//! ```text
//! GET_INFO    → [id, 0x10]
//!             ← [id, 0x10, page_size, buffer_pages, flash_pages, start_page, cpu_id[12], version]
//! LOAD_BUFFER → [id, 0x14, page, address, data…]              (no reply)
//! WRITE_FLASH → [id, 0x18, buffer_page, flash_page, count]
//!             ← [id, 0x18, done, error]
//! READ_FLASH  → [id, 0x1C, page, address]
//!             ← [id, 0x1C, page, address, data…]
//! RESET_INIT  → [id, 0xFF]    ← [id, 0xFF, …]
//! RESET       → [id, 0xF0, 0x01]                              (no reply)
//! ```
//!
//! All multi-byte fields are little-endian `u16`. Each request is sent,
//! then the bootloader channel is read until a reply with the same target
//! id and command arrives or the reply timeout runs out; the request is
//! repeated up to the configured number of attempts. Packets on other
//! ports and channels stay on the link.

use std::time::Instant;

use core::time::Duration;
use log::{debug, info, warn};

use super::{
    BOOTLOADER_CHANNEL, BootloaderPort, CMD_GET_INFO, CMD_LOAD_BUFFER, CMD_READ_FLASH, CMD_RESET,
    CMD_RESET_INIT, CMD_WRITE_FLASH, Target, TargetType,
};
use crate::config::LinkConfig;
use crate::crtp::{CrtpPort, MAX_PAYLOAD, Packet};
use crate::error::FlashError;
use crate::link::Link;

/// `[id, cmd, page u16, address u16]` in front of every buffer slice.
const LOAD_HEADER_LEN: usize = 6;

/// Largest buffer slice per `LOAD_BUFFER` packet.
pub const LOAD_SLICE: usize = MAX_PAYLOAD - LOAD_HEADER_LEN;

/// `[id, cmd, page u16, address u16]` in front of read-back data.
const READ_HEADER_LEN: usize = 6;

/// Fixed part of a `GET_INFO` reply, up to and including the CPU id.
const INFO_MIN_LEN: usize = 2 + 8 + 12;

fn write_error_detail(code: u8) -> &'static str {
    match code {
        1 => "address out of bounds",
        2 => "flash erase failed",
        3 => "flash programming failed",
        _ => "unknown error",
    }
}

fn le16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

pub struct Cloader<L: Link> {
    link: L,
    reply_timeout: Duration,
    attempts: u32,
}

impl<L: Link> Cloader<L> {
    pub fn new(link: L, config: &LinkConfig) -> Self {
        Self {
            link,
            reply_timeout: Duration::from_millis(config.bootloader_reply_timeout_ms),
            attempts: config.bootloader_retries.max(1),
        }
    }

    pub fn link(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    fn send(&mut self, target_id: u8, cmd: u8, args: &[u8]) -> crate::Result<()> {
        let mut payload = Vec::with_capacity(2 + args.len());
        payload.extend_from_slice(&[target_id, cmd]);
        payload.extend_from_slice(args);
        let packet = Packet::on(CrtpPort::LinkControl, BOOTLOADER_CHANNEL, &payload)?;
        self.link.send_packet(packet)
    }

    /// Send a request and wait for the matching reply payload.
    ///
    /// A reply matches when it is on the bootloader channel, echoes
    /// `target_id` and `cmd`, and satisfies `accept`.
    fn request(
        &mut self,
        target_id: u8,
        cmd: u8,
        args: &[u8],
        accept: impl Fn(&[u8]) -> bool,
    ) -> crate::Result<Vec<u8>> {
        for attempt in 1..=self.attempts {
            self.send(target_id, cmd, args)?;
            let deadline = Instant::now() + self.reply_timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let Some(packet) = self.link.receive_on(
                    CrtpPort::LinkControl.number(),
                    BOOTLOADER_CHANNEL,
                    remaining,
                ) else {
                    break;
                };
                let payload = packet.payload();
                let is_reply = payload.len() >= 2
                    && payload[0] == target_id
                    && payload[1] == cmd;
                if is_reply && accept(payload) {
                    return Ok(payload.to_vec());
                }
                debug!("bootloader: ignoring packet while waiting for 0x{:02X}", cmd);
            }
            debug!(
                "bootloader: no reply to 0x{:02X} (attempt {}/{})",
                cmd, attempt, self.attempts
            );
        }
        warn!("bootloader: command 0x{:02X} unanswered", cmd);
        Err(FlashError::NoReply(cmd).into())
    }

    /// Query flash geometry and bootloader version of a target.
    pub fn request_info(&mut self, kind: TargetType) -> crate::Result<Target> {
        let reply = self.request(kind.id(), CMD_GET_INFO, &[], |p| p.len() >= INFO_MIN_LEN)?;
        let mut cpu_id = [0u8; 12];
        cpu_id.copy_from_slice(&reply[10..INFO_MIN_LEN]);
        let target = Target {
            kind,
            page_size: le16(&reply, 2),
            buffer_pages: le16(&reply, 4),
            flash_pages: le16(&reply, 6),
            start_page: le16(&reply, 8),
            cpu_id,
            protocol_version: reply.get(INFO_MIN_LEN).copied().unwrap_or(0),
        };
        info!(
            "bootloader: {} page_size={} buffer_pages={} flash_pages={} start_page={} version=0x{:02X}",
            kind.name(),
            target.page_size,
            target.buffer_pages,
            target.flash_pages,
            target.start_page,
            target.protocol_version
        );
        Ok(target)
    }

    /// Stage `data` into buffer page `page` starting at byte `address`.
    /// Split into [`LOAD_SLICE`]-byte packets; the device does not reply.
    pub fn upload_buffer(
        &mut self,
        target_id: u8,
        page: u16,
        address: u16,
        data: &[u8],
    ) -> crate::Result<()> {
        let mut offset = address;
        for slice in data.chunks(LOAD_SLICE) {
            let mut args = [0u8; 4 + LOAD_SLICE];
            args[..2].copy_from_slice(&page.to_le_bytes());
            args[2..4].copy_from_slice(&offset.to_le_bytes());
            args[4..4 + slice.len()].copy_from_slice(slice);
            self.send(target_id, CMD_LOAD_BUFFER, &args[..4 + slice.len()])?;
            // `slice.len()` <= LOAD_SLICE
            offset = offset.wrapping_add(slice.len() as u16);
        }
        Ok(())
    }

    /// Commit buffer pages to flash and check the device's verdict.
    pub fn write_flash(
        &mut self,
        target_id: u8,
        buffer_page: u16,
        flash_page: u16,
        count: u16,
    ) -> crate::Result<()> {
        let mut args = [0u8; 6];
        args[..2].copy_from_slice(&buffer_page.to_le_bytes());
        args[2..4].copy_from_slice(&flash_page.to_le_bytes());
        args[4..].copy_from_slice(&count.to_le_bytes());
        let reply = self.request(target_id, CMD_WRITE_FLASH, &args, |p| p.len() >= 4)?;
        let (done, code) = (reply[2], reply[3]);
        if done != 1 || code != 0 {
            let detail = write_error_detail(code);
            warn!(
                "bootloader: write of {} page(s) at {} failed: {}",
                count, flash_page, detail
            );
            return Err(FlashError::WriteFailed { code, detail }.into());
        }
        debug!("bootloader: wrote {} page(s) at {}", count, flash_page);
        Ok(())
    }

    /// Read one full flash page back.
    pub fn read_flash(&mut self, target: &Target, page: u16) -> crate::Result<Vec<u8>> {
        let page_size = usize::from(target.page_size);
        let mut data = Vec::with_capacity(page_size);
        while data.len() < page_size {
            // `data.len()` < page_size <= u16::MAX
            let address = data.len() as u16;
            let mut args = [0u8; 4];
            args[..2].copy_from_slice(&page.to_le_bytes());
            args[2..].copy_from_slice(&address.to_le_bytes());
            let reply = self.request(target.id(), CMD_READ_FLASH, &args, |p| {
                p.len() > READ_HEADER_LEN && p[2..READ_HEADER_LEN] == args
            })?;
            data.extend_from_slice(&reply[READ_HEADER_LEN..]);
        }
        data.truncate(page_size);
        Ok(data)
    }

    /// Reboot the vehicle out of the bootloader into its firmware.
    pub fn reset_to_firmware(&mut self, kind: TargetType) -> crate::Result<()> {
        self.request(kind.id(), CMD_RESET_INIT, &[], |_| true)?;
        self.send(kind.id(), CMD_RESET, &[0x01])?;
        info!("bootloader: reset {} into firmware", kind.name());
        Ok(())
    }
}

impl<L: Link> BootloaderPort for Cloader<L> {
    fn upload_buffer(
        &mut self,
        target_id: u8,
        page: u16,
        address: u16,
        data: &[u8],
    ) -> crate::Result<()> {
        Cloader::upload_buffer(self, target_id, page, address, data)
    }

    fn write_flash(
        &mut self,
        target_id: u8,
        buffer_page: u16,
        flash_page: u16,
        count: u16,
    ) -> crate::Result<()> {
        Cloader::write_flash(self, target_id, buffer_page, flash_page, count)
    }
}
