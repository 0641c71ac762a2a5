//! Queue-backed link event sink.
//!
//! The pump pushes [`LinkEvent`]s into a bounded channel; the owner drains
//! it from its own thread whenever convenient. A full queue drops the new
//! event rather than stall the pump.

use std::sync::Arc;

use core::time::Duration;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use futures_lite::future;
use log::warn;

use crate::link::{LinkEvent, LinkEventSink};

/// Channel depth for queued link events.
pub const EVENT_DEPTH: usize = 16;

type EventChannel = Channel<CriticalSectionRawMutex, LinkEvent, EVENT_DEPTH>;

/// Owner side: drains events the pump produced.
#[derive(Clone)]
pub struct EventQueue {
    channel: Arc<EventChannel>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self {
            channel: Arc::new(Channel::new()),
        }
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink feeding this queue, to register on the link.
    pub fn sink(&self) -> QueueEventSink {
        QueueEventSink {
            channel: self.channel.clone(),
        }
    }

    pub fn try_next(&self) -> Option<LinkEvent> {
        self.channel.try_receive().ok()
    }

    /// Next event, waiting up to `timeout`.
    pub fn next_timeout(&self, timeout: Duration) -> Option<LinkEvent> {
        if let Some(event) = self.try_next() {
            return Some(event);
        }
        future::block_on(future::or(
            async { Some(self.channel.receive().await) },
            async {
                async_io_mini::Timer::after(timeout).await;
                None
            },
        ))
    }

    /// Everything queued right now.
    pub fn drain(&self) -> Vec<LinkEvent> {
        core::iter::from_fn(|| self.try_next()).collect()
    }
}

/// Pump side of an [`EventQueue`].
pub struct QueueEventSink {
    channel: Arc<EventChannel>,
}

impl LinkEventSink for QueueEventSink {
    fn emit(&mut self, event: &LinkEvent) {
        if self.channel.try_send(event.clone()).is_err() {
            warn!("event queue full, dropping {:?}", event);
        }
    }
}
