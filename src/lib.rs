//! Crazylink: ground-side driver for Crazyflie-class vehicles.
//!
//! ```text
//!   TocFetcher ─┐                         ┌── Crazyradio<UsbInterface>
//!   Bootloader ─┼─▶ Link (CrtpLink) ─▶ pump thread ─▶ RadioTransport
//!   caller ─────┘      bounded queues
//! ```
//!
//! - [`crtp`]: packet model and the one-byte-header frame codec.
//! - [`radio`]: the transport trait, ack model and the USB dongle driver.
//! - [`link`]: the packet pump turning one-exchange-at-a-time radio traffic
//!   into a duplex packet queue.
//! - [`toc`]: parameter and log variable catalogs and their download.
//! - [`bootloader`]: target discovery and page-buffered firmware flashing.
//!
//! The crate logs through the `log` facade and never installs a logger.

#![deny(unused_must_use)]

pub mod adapters;
pub mod bootloader;
pub mod cancel;
pub mod config;
pub mod crtp;
pub mod error;
pub mod link;
pub mod radio;
pub mod toc;

pub use error::{Error, Result};
