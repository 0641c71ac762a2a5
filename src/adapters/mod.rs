//! Adapters: concrete implementations of the event sink ports.
//!
//! | Adapter       | Implements                       | Delivers to                  |
//! |---------------|----------------------------------|------------------------------|
//! | `log_sink`    | LinkEventSink, FlashEventSink    | `log` facade                 |
//! | `event_queue` | LinkEventSink                    | bounded queue for the owner  |

pub mod event_queue;
pub mod log_sink;

pub use event_queue::{EventQueue, QueueEventSink};
pub use log_sink::LogEventSink;
