//! Sliding-window admission counter — the per-provider primitive behind
//! the RPM gate in `RateLimiter::acquire`. Not thread-safe on its own;
//! callers hold it behind a mutex keyed by provider.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Timestamps of admitted requests within the trailing 60-second window.
pub(super) struct SlidingWindow {
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub(super) fn new() -> Self {
        Self { timestamps: VecDeque::new() }
    }

    /// Attempt to admit a request at `now` against `capacity` starts per
    /// rolling 60s window. `Ok(())` records the timestamp and admits.
    /// `Err(wait)` means the window is full; `wait` is how long until the
    /// oldest entry ages out and a retry would succeed.
    pub(super) fn try_admit(&mut self, now: Instant, capacity: u32) -> Result<(), Duration> {
        self.prune(now);
        if (self.timestamps.len() as u32) < capacity {
            self.timestamps.push_back(now);
            Ok(())
        } else {
            let oldest = *self.timestamps.front().expect("a full window is never empty");
            let age = now.saturating_duration_since(oldest);
            Err(WINDOW.saturating_sub(age))
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.timestamps.front() {
            if now.saturating_duration_since(front) >= WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_capacity_then_reports_wait() {
        let mut w = SlidingWindow::new();
        let t0 = Instant::now();
        assert!(w.try_admit(t0, 2).is_ok());
        assert!(w.try_admit(t0, 2).is_ok());
        let wait = w.try_admit(t0, 2).unwrap_err();
        assert!(wait <= WINDOW && wait > Duration::ZERO);
    }

    #[test]
    fn prunes_entries_older_than_window() {
        let mut w = SlidingWindow::new();
        let t0 = Instant::now();
        assert!(w.try_admit(t0, 1).is_ok());
        assert!(w.try_admit(t0, 1).is_err());
        let t1 = t0 + WINDOW + Duration::from_millis(1);
        assert!(w.try_admit(t1, 1).is_ok());
    }

    #[test]
    fn wait_duration_shrinks_as_oldest_entry_ages() {
        let mut w = SlidingWindow::new();
        let t0 = Instant::now();
        w.try_admit(t0, 1).unwrap();
        let wait_immediate = w.try_admit(t0, 1).unwrap_err();
        let wait_later = w.try_admit(t0 + Duration::from_secs(30), 1).unwrap_err();
        assert!(wait_later < wait_immediate);
    }
}
