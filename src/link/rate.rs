//! Throughput accounting
//!
//! A [`RateAccumulator`] is written by exactly one task (the link worker) and
//! read from anywhere. Readers get a snapshot built from atomics, so a read
//! never waits on the writer and may lag it by one update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Length of one accounting window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Byte counter with a rolling one-window rate estimate.
#[derive(Debug)]
pub struct RateAccumulator {
    epoch: Instant,
    total_bytes: AtomicU64,
    window_start_ms: AtomicU64,
    window_bytes: AtomicU64,
    /// Rate of the last closed window, bytes/sec
    last_rate: AtomicU64,
}

impl Default for RateAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl RateAccumulator {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            total_bytes: AtomicU64::new(0),
            window_start_ms: AtomicU64::new(0),
            window_bytes: AtomicU64::new(0),
            last_rate: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Account `bytes` transferred now.
    pub fn record(&self, bytes: usize) {
        self.record_at(bytes as u64, self.now_ms());
    }

    fn record_at(&self, bytes: u64, now_ms: u64) {
        let window_ms = RATE_WINDOW.as_millis() as u64;
        let start = self.window_start_ms.load(Ordering::Acquire);
        let elapsed = now_ms.saturating_sub(start);

        if elapsed >= window_ms {
            let closed = self.window_bytes.swap(0, Ordering::AcqRel);
            // A window idle for longer than two spans says nothing about now
            let rate = if elapsed < 2 * window_ms {
                closed * 1000 / elapsed
            } else {
                0
            };
            self.last_rate.store(rate, Ordering::Release);
            self.window_start_ms.store(now_ms, Ordering::Release);
        }

        self.window_bytes.fetch_add(bytes, Ordering::AcqRel);
        self.total_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Current estimate in bytes/sec.
    pub fn current_rate(&self) -> u64 {
        self.rate_at(self.now_ms())
    }

    fn rate_at(&self, now_ms: u64) -> u64 {
        let window_ms = RATE_WINDOW.as_millis() as u64;
        let start = self.window_start_ms.load(Ordering::Acquire);
        let elapsed = now_ms.saturating_sub(start);
        if elapsed >= 2 * window_ms {
            return 0;
        }

        let open = self.window_bytes.load(Ordering::Acquire) * 1000 / elapsed.max(window_ms);
        open.max(self.last_rate.load(Ordering::Acquire))
    }

    /// Bytes accounted since creation.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_accumulator() {
        let acc = RateAccumulator::new();
        assert_eq!(acc.total_bytes(), 0);
        assert_eq!(acc.current_rate(), 0);
    }

    #[test]
    fn test_rate_reflects_recent_bytes() {
        let acc = RateAccumulator::new();
        acc.record(4096);
        assert_eq!(acc.total_bytes(), 4096);
        assert!(acc.current_rate() >= 4096 / 2);
    }

    #[test]
    fn test_window_rollover() {
        let acc = RateAccumulator::new();
        acc.record_at(1000, 0);
        acc.record_at(1000, 500);
        // Closes the first window: 2000 bytes over 1.5s
        acc.record_at(10, 1500);

        assert_eq!(acc.last_rate.load(Ordering::Acquire), 1333);
        assert_eq!(acc.total_bytes(), 2010);
        assert_eq!(acc.rate_at(1600), 1333);
    }

    #[test]
    fn test_stale_window_reads_zero() {
        let acc = RateAccumulator::new();
        acc.record_at(5000, 0);
        assert!(acc.rate_at(100) > 0);
        assert_eq!(acc.rate_at(2500), 0);
    }

    #[test]
    fn test_total_is_monotonic() {
        let acc = RateAccumulator::new();
        let mut last = 0;
        for n in [10, 0, 300, 7] {
            acc.record(n);
            assert!(acc.total_bytes() >= last);
            last = acc.total_bytes();
        }
        assert_eq!(last, 317);
    }
}
