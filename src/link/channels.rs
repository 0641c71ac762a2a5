//! Bounded packet queues between caller threads and the pump.
//!
//! Uses `embassy-sync` bounded MPMC channels, shared through `Arc`, to
//! bridge the synchronous caller API with the pump thread. Timed waits race
//! the channel future against an `async-io-mini` reactor timer inside
//! `futures_lite::future::block_on`.
//!
//! ```text
//! ┌──────────────┐  outbound (block when full)  ┌──────────────┐
//! │ caller       │─────────────────────────────▶│ pump thread  │
//! │ send/receive │◀─────────────────────────────│ (transport)  │
//! └──────────────┘  inbound (drop oldest)       └──────────────┘
//! ```
//!
//! Backpressure policy:
//! - outbound: `send_packet` blocks while the queue is full and never drops;
//! - inbound: the pump never blocks on a slow consumer. When the queue is
//!   full the oldest packet is discarded to make room for the newest.

use core::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use futures_lite::future;
use log::warn;

use crate::crtp::Packet;

/// Channel depth for outbound (caller → pump) packets.
pub const OUTBOUND_DEPTH: usize = 32;

/// Channel depth for inbound (pump → caller) packets.
pub const INBOUND_DEPTH: usize = 64;

/// How often a blocked sender re-checks that the pump is still alive.
const SEND_RECHECK: Duration = Duration::from_millis(50);

pub type PacketChannel<const N: usize> = Channel<CriticalSectionRawMutex, Packet, N>;

/// Caller → pump queue.
pub type OutboundQueue = PacketChannel<OUTBOUND_DEPTH>;

/// Pump → caller queue.
pub type InboundQueue = PacketChannel<INBOUND_DEPTH>;

/// Take the next packet, waiting up to `timeout`.
///
/// Returns `None` on timeout; a zero timeout only polls.
pub fn receive_timeout<const N: usize>(
    queue: &PacketChannel<N>,
    timeout: Duration,
) -> Option<Packet> {
    if let Ok(packet) = queue.try_receive() {
        return Some(packet);
    }
    if timeout.is_zero() {
        return None;
    }
    future::block_on(future::or(
        async { Some(queue.receive().await) },
        async {
            async_io_mini::Timer::after(timeout).await;
            None
        },
    ))
}

/// Enqueue `packet`, blocking while the queue is full.
///
/// `consumer_alive` is polled while blocked; once it returns `false` the
/// packet is handed back instead of waiting forever on a dead consumer.
pub fn send_blocking<const N: usize>(
    queue: &PacketChannel<N>,
    mut packet: Packet,
    consumer_alive: impl Fn() -> bool,
) -> Result<(), Packet> {
    loop {
        match queue.try_send(packet) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(back)) => packet = back,
        }
        if !consumer_alive() {
            return Err(packet);
        }
        future::block_on(future::or(
            future::poll_fn(|cx| queue.poll_ready_to_send(cx)),
            async {
                async_io_mini::Timer::after(SEND_RECHECK).await;
            },
        ));
    }
}

/// Enqueue `packet` without blocking, evicting the oldest entry if full.
///
/// Returns `true` when a packet had to be discarded.
pub fn push_drop_oldest<const N: usize>(queue: &PacketChannel<N>, packet: Packet) -> bool {
    match queue.try_send(packet) {
        Ok(()) => false,
        Err(TrySendError::Full(packet)) => {
            let dropped = queue.try_receive().ok();
            if let Some(old) = &dropped {
                warn!(
                    "inbound queue full, dropping oldest packet (port {} ch {})",
                    old.port(),
                    old.channel()
                );
            }
            // A consumer may have drained a slot in between; either way
            // there is room now unless another producer raced us.
            if queue.try_send(packet).is_err() {
                warn!("inbound queue still full, dropping newest packet");
            }
            true
        }
    }
}
