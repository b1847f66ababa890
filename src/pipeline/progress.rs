//! Monotonic progress reporting.

use crate::store::ProgressSink;

pub const LOCKED: u8 = 5;
pub const PAGES_COUNTED: u8 = 10;
pub const SEPARATOR_DETECTED: u8 = 15;
pub const SEGMENTED: u8 = 30;
pub const COMPLETE: u8 = 100;

/// Percent after `done` of `total` segments have finished.
///
/// Segments share the span between [`SEGMENTED`] and [`COMPLETE`] evenly.
pub fn segment_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return COMPLETE;
    }
    let span = (COMPLETE - SEGMENTED) as usize;
    let done = done.min(total);
    SEGMENTED + (span * done / total) as u8
}

/// Writes progress for one upload, never letting the value go backwards.
///
/// Sink failures are logged and otherwise ignored.
pub struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    upload_id: &'a str,
    last: u8,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a dyn ProgressSink, upload_id: &'a str) -> Self {
        Self {
            sink,
            upload_id,
            last: 0,
        }
    }

    /// Report `percent` (clamped to 0-100 and to the last value written).
    pub fn report(&mut self, percent: u8, message: &str) -> u8 {
        let percent = percent.min(COMPLETE).max(self.last);
        self.last = percent;
        if let Err(e) = self.sink.write_progress(self.upload_id, percent, message) {
            tracing::warn!("Progress update for {} failed: {}", self.upload_id, e);
        }
        percent
    }

    pub fn last(&self) -> u8 {
        self.last
    }
}
