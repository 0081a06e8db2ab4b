//! Monotonic millisecond stopwatch.
//!
//! Mirrors `Timer_N` from the reference implementation: `start`/`stop`/`clear`,
//! `elapsed_ms`, and a running flag. Built on [`std::time::Instant`] rather
//! than a polled `osMillis()` counter, since that is the idiomatic Rust
//! replacement for a monotonic-clock platform hook.

use std::time::{Duration, Instant};

/// A timer that is either stopped or running since some `Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    started_at: Option<Instant>,
}

impl Timer {
    /// Creates a stopped timer.
    pub fn new() -> Self {
        Timer { started_at: None }
    }

    /// (Re)starts the timer from now.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stops the timer. `elapsed_ms` on a stopped timer is 0.
    pub fn stop(&mut self) {
        self.started_at = None;
    }

    /// Equivalent to `stop`; kept as a distinct name to mirror the source's
    /// separate `clear()` entry point.
    pub fn clear(&mut self) {
        self.started_at = None;
    }

    /// True if the timer is currently running.
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Milliseconds elapsed since `start`, or 0 if not running.
    pub fn elapsed_ms(&self) -> u32 {
        self.started_at
            .map(|t| t.elapsed().as_millis().min(u128::from(u32::MAX)) as u32)
            .unwrap_or(0)
    }

    /// Remaining time before `budget_ms` elapses, or `None` if not running.
    pub fn remaining(&self, budget_ms: u32) -> Option<Duration> {
        self.started_at.map(|_| {
            let elapsed = self.elapsed_ms();
            if elapsed >= budget_ms {
                Duration::from_millis(0)
            } else {
                Duration::from_millis(u64::from(budget_ms - elapsed))
            }
        })
    }
}
