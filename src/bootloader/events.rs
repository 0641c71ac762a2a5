//! Flash progress events.
//!
//! Emitted by [`FlashEngine`](super::FlashEngine) on the caller's thread
//! through a `&mut dyn FlashEventSink` passed into each flash call.

use super::TargetType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent {
    /// A job started. `current` counts from 1 up to `total`.
    Started {
        target: TargetType,
        descriptor: String,
        image_len: usize,
        pages: usize,
        current: usize,
        total: usize,
    },

    /// About to commit the buffers; `page` is the number of pages uploaded so far.
    Progress { page: usize, pages: usize },

    /// The image was written completely.
    Completed { target: TargetType, descriptor: String },

    /// The job was aborted. The target may be partially written.
    Failed { target: TargetType, message: String },
}

pub trait FlashEventSink {
    fn emit(&mut self, event: &FlashEvent);
}

/// Collects events, for callers that inspect them afterwards.
impl FlashEventSink for Vec<FlashEvent> {
    fn emit(&mut self, event: &FlashEvent) {
        self.push(event.clone());
    }
}
