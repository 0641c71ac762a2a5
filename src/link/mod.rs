//! Radio link: a packet-level duplex channel over a [`RadioTransport`].
//!
//! [`CrtpLink`] owns the transport until `connect`, then moves it into a
//! dedicated pump thread (see [`pump`]) and talks to that thread only
//! through two bounded queues (see [`channels`]). `close` stops the pump,
//! takes the transport back and releases it.
//!
//! Lifecycle: `Idle → Connected → Closed`. Scanning and sink registration
//! are only possible while idle; packet traffic only while connected.
//!
//! Several consumers share one inbound stream. [`Link::receive_on`] takes
//! the next packet for one port/channel and hands everything else back
//! through [`Link::requeue`], so a TOC fetch or a bootloader request does
//! not swallow console or log traffic.

pub mod channels;
pub mod events;
mod pump;

pub use events::{LinkEvent, LinkEventSink};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use core::time::Duration;
use embassy_sync::channel::Channel;
use heapless::Deque;
use log::{debug, error, info, warn};

use self::channels::{INBOUND_DEPTH, InboundQueue, OutboundQueue};
use self::pump::{Pump, PumpExit, PumpSettings};
use crate::config::LinkConfig;
use crate::crtp::Packet;
use crate::error::{LinkError, TransportError};
use crate::radio::{
    ConnectionData, Datarate, MAX_ARD_BYTES, MAX_RADIO_CHANNEL, RadioConfig, RadioTransport,
    RetryDelay,
};

/// Packet-level port used by the TOC fetcher and the bootloader client.
pub trait Link {
    /// Queue a packet for transmission. Blocks while the outbound queue is full.
    fn send_packet(&mut self, packet: Packet) -> crate::Result<()>;

    /// Take the next inbound packet, waiting up to `timeout`.
    fn receive_packet(&mut self, timeout: Duration) -> Option<Packet>;

    /// Put a received packet back in front of everything not yet received.
    fn requeue(&mut self, packet: Packet);

    /// Next inbound packet on `port`/`channel`, waiting up to `timeout`.
    ///
    /// Packets for anything else are requeued in arrival order once the
    /// wait ends.
    fn receive_on(&mut self, port: u8, channel: u8, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        let mut skipped = Vec::new();
        let found = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receive_packet(remaining) {
                Some(packet) if packet.port() == port && packet.channel() == channel => {
                    break Some(packet);
                }
                Some(packet) => skipped.push(packet),
                None => break None,
            }
        };
        for packet in skipped.into_iter().rev() {
            self.requeue(packet);
        }
        found
    }
}

enum LinkState<T> {
    Idle {
        transport: T,
    },
    Connected {
        stop: Arc<AtomicBool>,
        pump: JoinHandle<Option<PumpExit<T>>>,
    },
    Closed,
}

/// Radio link driven by a background pump thread.
pub struct CrtpLink<T: RadioTransport + Send + 'static> {
    state: LinkState<T>,
    sinks: Vec<Box<dyn LinkEventSink>>,
    outbound: Arc<OutboundQueue>,
    inbound: Arc<InboundQueue>,
    /// Requeued packets, delivered before the inbound queue.
    stash: Deque<Packet, INBOUND_DEPTH>,
    config: LinkConfig,
}

impl<T: RadioTransport + Send + 'static> CrtpLink<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, LinkConfig::default())
    }

    pub fn with_config(transport: T, config: LinkConfig) -> Self {
        Self {
            state: LinkState::Idle { transport },
            sinks: Vec::new(),
            outbound: Arc::new(Channel::new()),
            inbound: Arc::new(Channel::new()),
            stash: Deque::new(),
            config,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected { .. })
    }

    fn not_idle_error(&self) -> LinkError {
        match self.state {
            LinkState::Closed => LinkError::Closed,
            _ => LinkError::AlreadyConnected,
        }
    }

    /// Register an event sink. Only allowed before `connect`.
    pub fn add_event_sink(&mut self, sink: Box<dyn LinkEventSink>) -> crate::Result<()> {
        if !matches!(self.state, LinkState::Idle { .. }) {
            return Err(self.not_idle_error().into());
        }
        self.sinks.push(sink);
        Ok(())
    }

    /// Configure the radio for `channel`/`datarate` and start the pump.
    ///
    /// The steady-state ack retry count comes from the link configuration.
    /// Invalid settings fail here, before the pump exists.
    pub fn connect(&mut self, channel: u8, datarate: Datarate) -> crate::Result<()> {
        let LinkState::Idle { .. } = self.state else {
            return Err(self.not_idle_error().into());
        };
        let radio_config = RadioConfig {
            channel,
            datarate,
            address: self.config.address,
            power: self.config.power,
            ack_retry_count: self.config.link_ack_retry_count,
            retry_delay: RetryDelay::AckPayloadBytes(MAX_ARD_BYTES),
        };
        radio_config.validate()?;

        let LinkState::Idle { mut transport } =
            core::mem::replace(&mut self.state, LinkState::Closed)
        else {
            return Err(LinkError::AlreadyConnected.into());
        };
        if let Err(e) = transport.configure(&radio_config) {
            self.state = LinkState::Idle { transport };
            return Err(e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        // The pump waits in `slot` until the thread takes it, so a failed
        // spawn leaves the transport with the link.
        let slot = Arc::new(Mutex::new(Some(Pump::new(
            transport,
            core::mem::take(&mut self.sinks),
            self.outbound.clone(),
            self.inbound.clone(),
            stop.clone(),
            PumpSettings::from(&self.config),
            ConnectionData { channel, datarate },
        ))));
        let handoff = slot.clone();
        let spawned = std::thread::Builder::new()
            .name("crtp-pump".into())
            .stack_size(self.config.pump_stack_kb.saturating_mul(1024))
            .spawn(move || {
                let pump = handoff.lock().ok().and_then(|mut pump| pump.take());
                pump.map(Pump::run)
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("failed to spawn pump thread: {}", e);
                let pump = slot.lock().ok().and_then(|mut pump| pump.take());
                if let Some(PumpExit { transport, sinks }) = pump.map(Pump::into_exit) {
                    self.sinks = sinks;
                    self.state = LinkState::Idle { transport };
                }
                return Err(TransportError::Usb("failed to spawn pump thread").into());
            }
        };

        info!("link connected on channel {} ({:?})", channel, datarate);
        self.state = LinkState::Connected { stop, pump: handle };
        Ok(())
    }

    /// Queue a packet for the pump. Blocks while the outbound queue is full.
    pub fn send_packet(&self, packet: Packet) -> crate::Result<()> {
        let LinkState::Connected { pump, .. } = &self.state else {
            return Err(match self.state {
                LinkState::Closed => LinkError::Closed,
                _ => LinkError::NotConnected,
            }
            .into());
        };
        channels::send_blocking(&self.outbound, packet, || !pump.is_finished())
            .map_err(|_| TransportError::Unavailable.into())
    }

    /// Next inbound packet, or `None` once `timeout` elapses.
    pub fn receive_packet(&mut self, timeout: Duration) -> Option<Packet> {
        if let Some(packet) = self.stash.pop_front() {
            return Some(packet);
        }
        channels::receive_timeout(&self.inbound, timeout)
    }

    /// Put `packet` back at the front of the inbound stream.
    ///
    /// The stash holds as many packets as the inbound queue; once full,
    /// further requeues are dropped.
    pub fn requeue(&mut self, packet: Packet) {
        if self.stash.push_front(packet).is_err() {
            debug!("requeue stash full, packet dropped");
        }
    }

    /// Probe `channels` at one datarate. Only possible while idle.
    pub fn scan_channels(
        &mut self,
        channels: core::ops::RangeInclusive<u8>,
        datarate: Datarate,
    ) -> crate::Result<Vec<u8>> {
        let error = self.not_idle_error();
        let LinkState::Idle { transport } = &mut self.state else {
            return Err(error.into());
        };
        transport.scan_channels(channels, datarate)
    }

    /// Probe every channel at every datarate. Only possible while idle.
    pub fn scan_interface(&mut self) -> crate::Result<Vec<ConnectionData>> {
        let mut found = Vec::new();
        for datarate in Datarate::ALL {
            for channel in self.scan_channels(0..=MAX_RADIO_CHANNEL, datarate)? {
                found.push(ConnectionData { channel, datarate });
            }
        }
        info!("scan found {} vehicle(s)", found.len());
        Ok(found)
    }

    /// Stop the pump, then release the transport. Idempotent.
    pub fn close(&mut self) {
        match core::mem::replace(&mut self.state, LinkState::Closed) {
            LinkState::Idle { mut transport } => transport.close(),
            LinkState::Connected { stop, pump } => {
                stop.store(true, Ordering::Release);
                match pump.join() {
                    Ok(Some(PumpExit {
                        mut transport,
                        sinks,
                    })) => {
                        transport.close();
                        self.sinks = sinks;
                        info!("link closed");
                    }
                    Ok(None) => error!("pump thread never received its pump"),
                    Err(_) => error!("pump thread panicked; transport not released cleanly"),
                }
            }
            LinkState::Closed => {}
        }
        self.stash.clear();
        while self.inbound.try_receive().is_ok() {}
        let stale = core::iter::from_fn(|| self.outbound.try_receive().ok()).count();
        if stale > 0 {
            warn!("discarded {} unsent packet(s) on close", stale);
        }
    }
}

impl<T: RadioTransport + Send + 'static> Link for CrtpLink<T> {
    fn send_packet(&mut self, packet: Packet) -> crate::Result<()> {
        CrtpLink::send_packet(self, packet)
    }

    fn receive_packet(&mut self, timeout: Duration) -> Option<Packet> {
        CrtpLink::receive_packet(self, timeout)
    }

    fn requeue(&mut self, packet: Packet) {
        CrtpLink::requeue(self, packet)
    }
}

impl<T: RadioTransport + Send + 'static> Drop for CrtpLink<T> {
    fn drop(&mut self) {
        self.close();
    }
}
