//! Log-based event sink adapter.
//!
//! Implements [`LinkEventSink`] and [`FlashEventSink`] by writing each
//! event through the `log` facade. Whatever logger the application
//! installs decides where the lines end up.

use log::{info, warn};

use crate::bootloader::{FlashEvent, FlashEventSink};
use crate::link::{LinkEvent, LinkEventSink};

/// Adapter that logs every link and flash event.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl LinkEventSink for LogEventSink {
    fn emit(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::Connected { channel, datarate } => {
                info!("LINK | connected ch={} rate={:?}", channel, datarate);
            }
            LinkEvent::Quality(q) => info!("LINK | quality={}%", q),
            LinkEvent::NoAck => warn!("LINK | exchange without ack"),
            LinkEvent::Degraded {
                consecutive_failures,
            } => {
                warn!(
                    "LINK | possibly broken: {} unacknowledged exchanges",
                    consecutive_failures
                );
            }
            LinkEvent::TransportLost => warn!("LINK | transport lost"),
            LinkEvent::Disconnected => info!("LINK | disconnected"),
        }
    }
}

impl FlashEventSink for LogEventSink {
    fn emit(&mut self, event: &FlashEvent) {
        match event {
            FlashEvent::Started {
                target,
                descriptor,
                image_len,
                pages,
                current,
                total,
            } => {
                info!(
                    "FLASH | [{}/{}] {} ({}) {} bytes, {} pages",
                    current,
                    total,
                    target.name(),
                    descriptor,
                    image_len,
                    pages
                );
            }
            FlashEvent::Progress { page, pages } => {
                info!("FLASH | buffers full, flashing page {}/{}", page, pages);
            }
            FlashEvent::Completed { target, descriptor } => {
                info!("FLASH | {} ({}) done", target.name(), descriptor);
            }
            FlashEvent::Failed { target, message } => {
                warn!("FLASH | {} failed: {}", target.name(), message);
            }
        }
    }
}
