//! Per-sender inbound rate limiting.
//!
//! Each sender owns a fixed window counter: the window opens on the first
//! message and the count restarts at 1 on the first message after the window
//! has elapsed.

use std::time::{Duration, Instant};

/// Messages seen from one sender since `window_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCounter {
    /// Messages counted in the current window.
    pub count: u32,
    /// When the current window opened.
    pub window_start: Instant,
}

/// Result of recording one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Within the limit.
    Allowed { remaining: u32 },
    /// Over the limit; the window reopens after `retry_after`.
    Exceeded { retry_after: Duration },
}

impl RateDecision {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, Self::Exceeded { .. })
    }
}

impl RateCounter {
    /// Open a window at `now` with one message counted.
    #[must_use]
    pub fn start(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    /// Count one message at `now` against `max_per_window`.
    pub fn record(&mut self, now: Instant, window: Duration, max_per_window: u32) -> RateDecision {
        if now.saturating_duration_since(self.window_start) > window {
            *self = Self::start(now);
        } else {
            self.count = self.count.saturating_add(1);
        }

        if self.count > max_per_window {
            let age = now.saturating_duration_since(self.window_start);
            RateDecision::Exceeded {
                retry_after: window.saturating_sub(age),
            }
        } else {
            RateDecision::Allowed {
                remaining: max_per_window - self.count,
            }
        }
    }

    /// Whether the counter has been idle for longer than `retention`.
    pub fn is_stale(&self, now: Instant, retention: Duration) -> bool {
        now.saturating_duration_since(self.window_start) > retention
    }
}
