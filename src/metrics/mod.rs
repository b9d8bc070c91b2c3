//! Metrics for monitoring cache groups.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       GroupMetrics                          │
//! │  ┌──────────────────────────┐  ┌────────────────────────┐   │
//! │  │         Counters         │  │      Histograms        │   │
//! │  │ gets / hits / negatives  │  │ get latency            │   │
//! │  │ loads / deduped          │  │                        │   │
//! │  │ local loads / errors     │  │                        │   │
//! │  │ peer loads / errors      │  │                        │   │
//! │  │ server requests          │  │                        │   │
//! │  └──────────────────────────┘  └────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod histograms;

pub use counters::Counter;
pub use histograms::{Histogram, HistogramSnapshot, Timer, LATENCY_BUCKETS};

/// Counters and latency for one cache group.
#[derive(Debug)]
pub struct GroupMetrics {
    /// Every `get` call.
    pub gets: Counter,
    /// Gets served by the local store.
    pub cache_hits: Counter,
    /// Gets served by the negative cache.
    pub negative_hits: Counter,
    /// Loads actually started (one per flight).
    pub loads: Counter,
    /// Callers that joined an existing flight.
    pub loads_deduped: Counter,
    /// Successful local loader calls.
    pub local_loads: Counter,
    /// Failed local loader calls.
    pub local_load_errors: Counter,
    /// Successful peer fetches.
    pub peer_loads: Counter,
    /// Failed peer fetches.
    pub peer_errors: Counter,
    /// Requests served on behalf of other peers.
    pub server_requests: Counter,
    /// End-to-end `get` latency.
    pub get_latency: Histogram,
}

impl GroupMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self {
            gets: Counter::new(),
            cache_hits: Counter::new(),
            negative_hits: Counter::new(),
            loads: Counter::new(),
            loads_deduped: Counter::new(),
            local_loads: Counter::new(),
            local_load_errors: Counter::new(),
            peer_loads: Counter::new(),
            peer_errors: Counter::new(),
            server_requests: Counter::new(),
            get_latency: Histogram::new(LATENCY_BUCKETS),
        }
    }
}

impl Default for GroupMetrics {
    fn default() -> Self {
        Self::new()
    }
}
