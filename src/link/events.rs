//! Link events and the sink port they are delivered through.
//!
//! Sinks are registered on a [`CrtpLink`](super::CrtpLink) before
//! `connect`, move into the pump thread with the transport, and come back
//! on `close`. Every event is therefore delivered on the pump thread, in
//! the order the pump observed it.

use crate::radio::Datarate;

/// Structured events emitted by the pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The pump started on the given radio settings.
    Connected { channel: u8, datarate: Datarate },

    /// Link quality in percent, emitted when it changes.
    Quality(u8),

    /// An exchange produced no ack at all. Any frame in it is dropped.
    NoAck,

    /// Advisory: this many consecutive exchanges went unacknowledged.
    /// The counter restarts, so the event repeats while the link stays bad.
    Degraded { consecutive_failures: u32 },

    /// The transport went away; the pump has stopped.
    TransportLost,

    /// The pump exited.
    Disconnected,
}

/// Receives [`LinkEvent`]s on the pump thread.
pub trait LinkEventSink: Send {
    fn emit(&mut self, event: &LinkEvent);
}
