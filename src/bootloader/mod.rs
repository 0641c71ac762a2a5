//! Bootloader: flash firmware images into the vehicle's page-buffered flash.
//!
//! Flow: `Bootloader::scan` (find the bootloader) → `Bootloader::open`
//! (connect, query targets) → N × `FlashEngine::flash` → `reset_to_firmware`
//!
//! ```text
//!   Bootloader ──▶ FlashEngine ──▶ BootloaderPort (Cloader) ──▶ Link
//!        │                                                       │
//!        └── manifest / archive → FlashTarget list               ▼
//!                                                       port 15, channel 3
//! ```
//!
//! Every bootloader packet carries `[target_id, command, args…]` on the
//! link-control port, channel 3.

pub mod cloader;
pub mod events;
pub mod flash;
pub mod manifest;

pub use cloader::Cloader;
pub use events::{FlashEvent, FlashEventSink};
pub use flash::FlashEngine;
pub use manifest::{FirmwareDetails, Manifest};

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use core::time::Duration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{FlashError, ManifestError};
use crate::link::{CrtpLink, Link};
use crate::radio::{ConnectionData, Datarate, RadioTransport};

// ── Protocol constants ────────────────────────────────────────

pub const BOOTLOADER_CHANNEL: u8 = 3;

pub const CMD_GET_INFO: u8 = 0x10;
pub const CMD_LOAD_BUFFER: u8 = 0x14;
pub const CMD_WRITE_FLASH: u8 = 0x18;
pub const CMD_READ_FLASH: u8 = 0x1C;
pub const CMD_RESET_INIT: u8 = 0xFF;
pub const CMD_RESET: u8 = 0xF0;

/// Protocol version reported by dual-MCU (STM32 + nRF51) bootloaders.
pub const PROTOCOL_VERSION_CF2: u8 = 0x10;

/// Where a bootloader listens, on the default address: channel 110 after a
/// warm boot from firmware, channel 0 after a cold boot.
pub const BOOTLOADER_CONNECTIONS: [ConnectionData; 2] = [
    ConnectionData {
        channel: 110,
        datarate: Datarate::Mbps2,
    },
    ConnectionData {
        channel: 0,
        datarate: Datarate::Mbps2,
    },
];

/// Pause between scan rounds while looking for a bootloader.
const SCAN_PAUSE: Duration = Duration::from_millis(100);

// ── Targets ───────────────────────────────────────────────────

/// A flashable MCU on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetType {
    Stm32,
    Nrf51,
}

impl TargetType {
    pub const fn id(self) -> u8 {
        match self {
            Self::Stm32 => 0xFF,
            Self::Nrf51 => 0xFE,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Stm32 => "stm32",
            Self::Nrf51 => "nrf51",
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0xFF => Some(Self::Stm32),
            0xFE => Some(Self::Nrf51),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "stm32" => Some(Self::Stm32),
            "nrf51" => Some(Self::Nrf51),
            _ => None,
        }
    }
}

/// Flash geometry of one target, as reported by `GET_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub kind: TargetType,
    pub page_size: u16,
    pub buffer_pages: u16,
    pub flash_pages: u16,
    pub start_page: u16,
    pub cpu_id: [u8; 12],
    pub protocol_version: u8,
}

impl Target {
    pub const fn id(&self) -> u8 {
        self.kind.id()
    }

    /// Bytes available from `start_page` to the end of flash.
    pub fn capacity_from(&self, start_page: u16) -> usize {
        usize::from(self.flash_pages.saturating_sub(start_page)) * usize::from(self.page_size)
    }
}

/// One flashing job: an image bound for a target, starting at a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashTarget {
    pub target: Target,
    pub image: Vec<u8>,
    /// What the image is (`"fw"`, `"binary"`, `"CF1 config"`…).
    pub descriptor: String,
    pub start_page: u16,
}

impl FlashTarget {
    /// Job starting at the target's first writable page.
    pub fn new(target: Target, image: Vec<u8>, descriptor: impl Into<String>) -> Self {
        Self {
            start_page: target.start_page,
            target,
            image,
            descriptor: descriptor.into(),
        }
    }
}

/// The two bootloader commands flashing needs.
///
/// [`Cloader`] implements this over a [`Link`]; tests record the calls.
pub trait BootloaderPort {
    /// Stage `data` into device buffer page `page`, at byte offset `address`.
    fn upload_buffer(&mut self, target_id: u8, page: u16, address: u16, data: &[u8])
    -> crate::Result<()>;

    /// Commit `count` buffer pages, starting at `buffer_page`, to flash page `flash_page`.
    fn write_flash(
        &mut self,
        target_id: u8,
        buffer_page: u16,
        flash_page: u16,
        count: u16,
    ) -> crate::Result<()>;
}

// ── Session ───────────────────────────────────────────────────

/// A bootloader session over one link.
pub struct Bootloader<L: Link> {
    cloader: Cloader<L>,
    engine: FlashEngine,
    targets: BTreeMap<TargetType, Target>,
    protocol_version: Option<u8>,
}

impl<L: Link> Bootloader<L> {
    pub fn new(cloader: Cloader<L>) -> Self {
        Self {
            cloader,
            engine: FlashEngine::new(),
            targets: BTreeMap::new(),
            protocol_version: None,
        }
    }

    /// Query the STM32 and, on dual-MCU bootloaders, the nRF51.
    pub fn start(&mut self) -> crate::Result<()> {
        let stm32 = self.cloader.request_info(TargetType::Stm32)?;
        let version = stm32.protocol_version;
        self.targets.insert(TargetType::Stm32, stm32);
        self.protocol_version = Some(version);

        if version == PROTOCOL_VERSION_CF2 {
            let nrf51 = self.cloader.request_info(TargetType::Nrf51)?;
            self.targets.insert(TargetType::Nrf51, nrf51);
        } else {
            warn!("bootloader protocol 0x{:02X}: only the STM32 is flashable", version);
        }
        info!(
            "bootloader started (protocol 0x{:02X}, {} target(s))",
            version,
            self.targets.len()
        );
        Ok(())
    }

    pub fn protocol_version(&self) -> Option<u8> {
        self.protocol_version
    }

    pub fn targets(&self) -> &BTreeMap<TargetType, Target> {
        &self.targets
    }

    pub fn target(&self, kind: TargetType) -> Option<&Target> {
        self.targets.get(&kind)
    }

    pub fn cloader(&mut self) -> &mut Cloader<L> {
        &mut self.cloader
    }

    /// Flash an archive directory or a single image.
    ///
    /// With an archive every manifest entry whose target is present (and
    /// named in `target_names`, if any are given) is flashed in turn. A raw
    /// image needs exactly one target name. Nothing is sent until every
    /// input has been resolved.
    pub fn flash(
        &mut self,
        path: &Path,
        target_names: &[&str],
        sink: &mut dyn FlashEventSink,
        cancel: &CancelToken,
    ) -> crate::Result<()> {
        let jobs = manifest::collect_flash_targets(path, target_names, &self.targets)?;
        if jobs.is_empty() {
            return Err(ManifestError::NoFilesToFlash.into());
        }
        let total = jobs.len();
        for (current, job) in jobs.iter().enumerate() {
            self.engine
                .flash(job, &mut self.cloader, sink, cancel, current + 1, total)?;
        }
        Ok(())
    }

    /// Flash one prepared job.
    pub fn flash_target(
        &mut self,
        job: &FlashTarget,
        sink: &mut dyn FlashEventSink,
        cancel: &CancelToken,
    ) -> crate::Result<()> {
        self.engine.flash(job, &mut self.cloader, sink, cancel, 1, 1)
    }

    fn stm32(&self) -> crate::Result<Target> {
        self.target(TargetType::Stm32)
            .copied()
            .ok_or_else(|| FlashError::UnknownTarget(TargetType::Stm32.name().into()).into())
    }

    /// Read the single-MCU configuration block (last STM32 flash page).
    pub fn read_cf1_config(&mut self) -> crate::Result<Vec<u8>> {
        let stm32 = self.stm32()?;
        let page = stm32.flash_pages.saturating_sub(1);
        self.cloader.read_flash(&stm32, page)
    }

    /// Overwrite the single-MCU configuration block.
    pub fn write_cf1_config(
        &mut self,
        data: &[u8],
        sink: &mut dyn FlashEventSink,
        cancel: &CancelToken,
    ) -> crate::Result<()> {
        let stm32 = self.stm32()?;
        let job = FlashTarget {
            start_page: stm32.flash_pages.saturating_sub(1),
            target: stm32,
            image: data.to_vec(),
            descriptor: "CF1 config".into(),
        };
        self.flash_target(&job, sink, cancel)
    }

    /// Leave the bootloader. Dual-MCU bootloaders are reset through the nRF51.
    pub fn reset_to_firmware(&mut self) -> crate::Result<()> {
        let kind = if self.protocol_version == Some(PROTOCOL_VERSION_CF2) {
            TargetType::Nrf51
        } else {
            TargetType::Stm32
        };
        self.cloader.reset_to_firmware(kind)
    }

    pub fn into_cloader(self) -> Cloader<L> {
        self.cloader
    }
}

impl<T: RadioTransport + Send + 'static> Bootloader<CrtpLink<T>> {
    /// Probe [`BOOTLOADER_CONNECTIONS`] until one answers.
    ///
    /// Rounds repeat until `bootloader_scan_timeout_ms` has passed; `None`
    /// means no bootloader was seen. `link` must still be idle.
    pub fn scan(
        link: &mut CrtpLink<T>,
        cancel: &CancelToken,
    ) -> crate::Result<Option<ConnectionData>> {
        let timeout = Duration::from_millis(link.config().bootloader_scan_timeout_ms);
        let deadline = Instant::now() + timeout;
        loop {
            cancel.check()?;
            for candidate in BOOTLOADER_CONNECTIONS {
                let channel = candidate.channel;
                if link
                    .scan_channels(channel..=channel, candidate.datarate)?
                    .contains(&channel)
                {
                    info!("bootloader found on channel {} ({:?})", channel, candidate.datarate);
                    return Ok(Some(candidate));
                }
            }
            if Instant::now() >= deadline {
                warn!("no bootloader found after {:?}", timeout);
                return Ok(None);
            }
            debug!("no bootloader yet, scanning again");
            std::thread::sleep(SCAN_PAUSE);
        }
    }

    /// Connect to a bootloader found by [`scan`](Self::scan) and query its
    /// targets.
    pub fn open(mut link: CrtpLink<T>, connection: ConnectionData) -> crate::Result<Self> {
        link.connect(connection.channel, connection.datarate)?;
        let config = link.config().clone();
        let mut bootloader = Self::new(Cloader::new(link, &config));
        bootloader.start()?;
        Ok(bootloader)
    }
}
