//! Latency histograms with fixed bucket boundaries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Bucket upper bounds (seconds) suited to cache lookups, from local hits in
/// microseconds to peer round trips and backing-store loads.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
];

/// A cumulative histogram of durations.
#[derive(Debug)]
pub struct Histogram {
    buckets: &'static [f64],
    /// Observations falling at or below each bound (non-cumulative here,
    /// accumulated in `snapshot`).
    counts: Vec<AtomicU64>,
    /// Observations above the last bound.
    overflow: AtomicU64,
    sum_nanos: AtomicU64,
}

impl Histogram {
    /// Create a histogram over `buckets`, which must be sorted ascending.
    pub fn new(buckets: &'static [f64]) -> Self {
        Self {
            buckets,
            counts: buckets.iter().map(|_| AtomicU64::new(0)).collect(),
            overflow: AtomicU64::new(0),
            sum_nanos: AtomicU64::new(0),
        }
    }

    /// Record one duration.
    pub fn observe(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        self.sum_nanos
            .fetch_add(duration.as_nanos().min(u64::MAX as u128) as u64, Ordering::Relaxed);

        match self.buckets.iter().position(|&bound| secs <= bound) {
            Some(i) => self.counts[i].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Start a timer; the elapsed time is recorded by [`Timer::stop`].
    pub fn start_timer(&self) -> Timer<'_> {
        Timer {
            histogram: self,
            start: Instant::now(),
        }
    }

    /// Point-in-time copy with cumulative bucket counts.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut running = 0;
        let cumulative = self
            .counts
            .iter()
            .map(|c| {
                running += c.load(Ordering::Relaxed);
                running
            })
            .collect();

        HistogramSnapshot {
            buckets: self.buckets.to_vec(),
            cumulative,
            count: running + self.overflow.load(Ordering::Relaxed),
            sum: Duration::from_nanos(self.sum_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Records elapsed time into a histogram.
pub struct Timer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl Timer<'_> {
    /// Record and return the elapsed time.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        self.histogram.observe(elapsed);
        elapsed
    }
}

/// A snapshot of histogram data.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds in seconds.
    pub buckets: Vec<f64>,
    /// Observations at or below each bound.
    pub cumulative: Vec<u64>,
    /// Total observations.
    pub count: u64,
    /// Sum of observed durations.
    pub sum: Duration,
}

impl HistogramSnapshot {
    /// Mean observed duration.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.sum.as_nanos() / self.count as u128) as u64)
        }
    }

    /// Upper bound (seconds) of the bucket holding the `p`th percentile, or
    /// `None` if it lies above every bucket or nothing was observed.
    pub fn percentile_bound(&self, p: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let target = ((self.count as f64) * p / 100.0).ceil().max(1.0) as u64;
        self.cumulative
            .iter()
            .position(|&c| c >= target)
            .map(|i| self.buckets[i])
    }
}
