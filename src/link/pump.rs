//! Pump thread: the only code that talks to the radio while connected.
//!
//! Every iteration performs exactly one exchange: the next outbound frame
//! (or the idle probe `0xFF` when there is none) goes out, one ack comes
//! back. Inbound data rides on acks, so the pump keeps probing even when
//! the caller has nothing to say.
//!
//! ```text
//!  ┌──────────── stop flag set? ──── yes ──▶ exit (transport, sinks)
//!  │                   │ no
//!  │     pending retransmit? ── yes ──┐
//!  │                   │ no           │
//!  │   outbound.try_receive / wait ≤ idle_wait when idling
//!  │                   │              │
//!  │                   ▼              ▼
//!  │           transport.exchange(frame)
//!  │      Err ──▶ TransportLost, exit
//!  │      None ─▶ NoAck, frame dropped
//!  │      nack ─▶ failures += 1 (Degraded at threshold), retransmit
//!  │      ack  ─▶ payload? decode → inbound (drop oldest)
//!  └──────────────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use core::time::Duration;
use heapless::Vec;
use log::{debug, error, info, warn};

use super::channels::{self, InboundQueue, OutboundQueue};
use super::events::{LinkEvent, LinkEventSink};
use crate::config::LinkConfig;
use crate::crtp::codec::{self, MAX_FRAME};
use crate::crtp::NULL_PACKET;
use crate::radio::{ConnectionData, RadioTransport};

type Frame = Vec<u8, MAX_FRAME>;

/// Pump tunables, taken from [`LinkConfig`] at connect time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PumpSettings {
    pub failure_threshold: u32,
    pub idle_backoff_after: u32,
    pub idle_wait: Duration,
}

impl From<&LinkConfig> for PumpSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            failure_threshold: config.link_failure_threshold,
            idle_backoff_after: config.idle_backoff_after,
            idle_wait: Duration::from_millis(config.idle_wait_ms),
        }
    }
}

/// Everything the pump owns; handed back when it exits.
pub(crate) struct PumpExit<T> {
    pub transport: T,
    pub sinks: std::vec::Vec<Box<dyn LinkEventSink>>,
}

pub(crate) struct Pump<T> {
    transport: T,
    sinks: std::vec::Vec<Box<dyn LinkEventSink>>,
    outbound: Arc<OutboundQueue>,
    inbound: Arc<InboundQueue>,
    stop: Arc<AtomicBool>,
    settings: PumpSettings,
    connection: ConnectionData,
}

impl<T: RadioTransport> Pump<T> {
    pub fn new(
        transport: T,
        sinks: std::vec::Vec<Box<dyn LinkEventSink>>,
        outbound: Arc<OutboundQueue>,
        inbound: Arc<InboundQueue>,
        stop: Arc<AtomicBool>,
        settings: PumpSettings,
        connection: ConnectionData,
    ) -> Self {
        Self {
            transport,
            sinks,
            outbound,
            inbound,
            stop,
            settings,
            connection,
        }
    }

    /// Give everything back without running.
    pub fn into_exit(self) -> PumpExit<T> {
        PumpExit {
            transport: self.transport,
            sinks: self.sinks,
        }
    }

    fn emit(&mut self, event: LinkEvent) {
        for sink in self.sinks.iter_mut() {
            sink.emit(&event);
        }
    }

    /// Next frame to transmit: a queued packet, or the idle probe.
    fn next_frame(&self, idle: bool) -> Frame {
        let wait = if idle {
            self.settings.idle_wait
        } else {
            Duration::ZERO
        };
        match channels::receive_timeout(&self.outbound, wait) {
            Some(packet) => codec::encode(&packet),
            None => {
                let mut probe = Frame::new();
                // MAX_FRAME > NULL_PACKET.len()
                let _ = probe.extend_from_slice(&NULL_PACKET);
                probe
            }
        }
    }

    /// Run until the stop flag is set or the transport is lost.
    pub fn run(mut self) -> PumpExit<T> {
        info!(
            "pump started (channel {}, {:?})",
            self.connection.channel, self.connection.datarate
        );
        self.emit(LinkEvent::Connected {
            channel: self.connection.channel,
            datarate: self.connection.datarate,
        });

        let mut retransmit: Option<Frame> = None;
        let mut consecutive_failures: u32 = 0;
        let mut empty_acks: u32 = 0;
        let mut last_quality: Option<u8> = None;

        while !self.stop.load(Ordering::Acquire) {
            let frame = match retransmit.take() {
                Some(frame) => frame,
                None => self.next_frame(empty_acks > self.settings.idle_backoff_after),
            };

            let ack = match self.transport.exchange(&frame) {
                Ok(Some(ack)) => ack,
                Ok(None) => {
                    warn!("dongle reported no ack, frame dropped");
                    self.emit(LinkEvent::NoAck);
                    continue;
                }
                Err(e) => {
                    error!("radio transport lost: {}", e);
                    self.emit(LinkEvent::TransportLost);
                    break;
                }
            };

            let quality = ack.quality();
            if last_quality != Some(quality) {
                last_quality = Some(quality);
                self.emit(LinkEvent::Quality(quality));
            }

            if !ack.acknowledged {
                consecutive_failures += 1;
                if consecutive_failures >= self.settings.failure_threshold {
                    warn!(
                        "link degraded: {} consecutive exchanges unacknowledged",
                        consecutive_failures
                    );
                    self.emit(LinkEvent::Degraded {
                        consecutive_failures,
                    });
                    consecutive_failures = 0;
                }
                if frame.as_slice() != NULL_PACKET.as_slice() {
                    retransmit = Some(frame);
                }
                continue;
            }
            consecutive_failures = 0;

            match ack.payload.as_deref() {
                Some(data) if !data.is_empty() => {
                    empty_acks = 0;
                    match codec::decode(data) {
                        Ok(packet) => {
                            channels::push_drop_oldest(&self.inbound, packet);
                        }
                        Err(e) => debug!("discarding undecodable ack payload: {}", e),
                    }
                }
                _ => empty_acks = empty_acks.saturating_add(1),
            }
        }

        info!("pump stopped");
        self.emit(LinkEvent::Disconnected);
        PumpExit {
            transport: self.transport,
            sinks: self.sinks,
        }
    }
}
