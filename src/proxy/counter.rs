//! Success/failure accounting that drives rotation

use parking_lot::Mutex;

/// Snapshot of the current measurement window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub successes: u32,
    pub failures: u32,
}

/// Counts consecutive outcomes since the last rotation
///
/// Increment and threshold check happen under one lock, so each recorded outcome
/// sees a consistent count. Only [`RequestCounter::reset`] clears the window.
#[derive(Debug, Default)]
pub struct RequestCounter {
    counts: Mutex<RequestCounts>,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful request; returns true when rotation is due
    ///
    /// A threshold of 0 disables the trigger and leaves the count untouched.
    pub fn record_success(&self, threshold: u32) -> bool {
        if threshold == 0 {
            return false;
        }
        let mut counts = self.counts.lock();
        counts.successes = counts.successes.saturating_add(1);
        counts.successes >= threshold
    }

    /// Record a failed request; returns true when rotation is due
    pub fn record_failure(&self, threshold: u32) -> bool {
        if threshold == 0 {
            return false;
        }
        let mut counts = self.counts.lock();
        counts.failures = counts.failures.saturating_add(1);
        counts.failures >= threshold
    }

    pub fn reset(&self) {
        *self.counts.lock() = RequestCounts::default();
    }

    pub fn snapshot(&self) -> RequestCounts {
        *self.counts.lock()
    }
}
