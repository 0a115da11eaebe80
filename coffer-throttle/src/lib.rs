//! Byte-rate throttling for backup and restore copy streams
//!
//! This crate provides a blocking rate limiter that a stream of copy
//! operations reports its chunk sizes to. Callers share one limiter per
//! logical operation (one backup, one restore) so the cumulative
//! throughput of all copies stays under the configured ceiling.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

/// Credit carried across idle gaps is capped at one period's worth of
/// bytes, so a limiter that sat unused cannot grant an unbounded burst.
const BURST_PERIOD: Duration = Duration::from_millis(100);

/// Blocking byte-rate limiter.
///
/// `request(bytes)` blocks the calling thread until the cumulative byte
/// count reported since the first request fits under the configured
/// bytes-per-second ceiling. A ceiling of zero disables limiting
/// entirely. Interior state sits behind a mutex so one limiter can be
/// shared by reference between the copier and its caller.
pub struct RateLimiter {
    bytes_per_second: u64,
    window: Mutex<Window>,
}

struct Window {
    started_at: Option<Instant>,
    consumed: u64,
}

impl RateLimiter {
    /// Create a limiter with the given ceiling; 0 means unlimited.
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second,
            window: Mutex::new(Window {
                started_at: None,
                consumed: 0,
            }),
        }
    }

    /// Create a limiter that never blocks.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// The configured ceiling in bytes per second (0 = unlimited).
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// True when this limiter never blocks.
    pub fn is_unlimited(&self) -> bool {
        self.bytes_per_second == 0
    }

    /// Report `bytes` consumed and block until the cumulative rate fits
    /// under the ceiling.
    pub fn request(&self, bytes: u64) {
        if self.bytes_per_second == 0 || bytes == 0 {
            return;
        }

        let deficit = {
            let mut window = match self.window.lock() {
                Ok(guard) => guard,
                // A panicked holder only ever updated plain counters;
                // the window is still usable.
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let started_at = *window.started_at.get_or_insert(now);
            window.consumed = window.consumed.saturating_add(bytes);

            let target =
                Duration::from_secs_f64(window.consumed as f64 / self.bytes_per_second as f64);
            let elapsed = now.duration_since(started_at);

            if elapsed > target + BURST_PERIOD {
                // Idle gap: rebase the window so at most one period of
                // credit is carried forward.
                window.started_at = Some(now - target - BURST_PERIOD);
                Duration::ZERO
            } else if target > elapsed {
                target - elapsed
            } else {
                Duration::ZERO
            }
        };

        if !deficit.is_zero() {
            trace!(
                wait_ms = deficit.as_millis() as u64,
                bytes,
                "throttling copy stream"
            );
            std::thread::sleep(deficit);
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("bytes_per_second", &self.bytes_per_second)
            .finish()
    }
}
