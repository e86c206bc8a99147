//! Reconnect backoff.
//!
//! Delay doubles on each consecutive failure, starting at the base and
//! capping at the maximum. A successful connect clears the whole entry,
//! so the next failure starts over at the base.

use std::time::Duration;

/// Per-session backoff state.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            next: base,
        }
    }

    /// The delay to use for the upcoming attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(self.cap);
        delay
    }

    /// Back to the base delay.
    pub fn reset(&mut self) {
        self.next = self.base;
    }
}
