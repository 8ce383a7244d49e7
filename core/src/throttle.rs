//! Outgoing-write throttling
//!
//! Token bucket with a capacity of one token, refilled once per interval.
//! Each connection's writer task owns one limiter and acquires a token
//! before every write, so queued writes drain in FIFO order at the
//! configured rate. Writes are only ever delayed, never dropped.

use std::time::Duration;
use tokio::time::Instant;

/// Per-connection write rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    /// Refill interval; `None` disables throttling entirely
    interval: Option<Duration>,
    /// Earliest instant the next token becomes available
    next_slot: Option<Instant>,
}

impl RateLimiter {
    /// Create a limiter with the given refill interval (`None` = disabled)
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            next_slot: None,
        }
    }

    /// Whether throttling is active
    pub fn enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Take a token, waiting for the refill if none is available
    pub async fn acquire(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        let ready = match self.next_slot {
            Some(slot) if slot > now => {
                tokio::time::sleep_until(slot).await;
                slot
            }
            _ => now,
        };
        self.next_slot = Some(ready + interval);
    }
}
