//! Bulk cache warming from an enumerable backing store.
//!
//! A warm pass walks [`Loader::keys`](crate::loader::Loader::keys) and runs
//! every key through [`CacheGroup::get`], so keys land on their owners exactly
//! as they would under normal traffic. Fan-out is bounded so the backing
//! store is not flooded at startup.

use crate::cache::CacheGroup;
pub use crate::config::{WarmConfig, WarmScope};
use crate::error::{Error, LoadError, Result};
use bytes::Bytes;
use futures::{future, StreamExt};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of a warm pass.
#[derive(Debug, Clone, Default)]
pub struct WarmReport {
    /// Keys enumerated.
    pub total: usize,
    /// Keys now cached (locally or on their owner).
    pub loaded: usize,
    /// Keys skipped because another peer owns them.
    pub skipped: usize,
    /// Keys that failed, with their error.
    pub failed: Vec<(Bytes, Error)>,
    /// Error that cut the key enumeration short, if any.
    pub enumeration_error: Option<LoadError>,
    /// Wall time of the pass.
    pub elapsed: Duration,
}

impl WarmReport {
    /// Whether every attempted key failed.
    pub fn all_failed(&self) -> bool {
        !self.failed.is_empty() && self.loaded == 0
    }
}

enum Outcome {
    Loaded,
    Skipped,
    Failed(Bytes, Error),
    Enumeration(LoadError),
}

/// Runs warm passes with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Warmer {
    config: WarmConfig,
}

impl Warmer {
    pub fn new(config: WarmConfig) -> Self {
        Self { config }
    }

    /// Warm `group` from its loader's key enumeration.
    ///
    /// Per-key failures are logged and reported. An enumeration error stops
    /// the walk; keys already handed out still finish. The pass fails only if
    /// nothing was loaded: enumeration failed outright, or every key failed.
    pub async fn warm(&self, group: &CacheGroup) -> Result<WarmReport> {
        let started = Instant::now();
        let scope = self.config.scope;
        let concurrency = self.config.concurrency.max(1);

        info!(group = %group.name(), concurrency, scope = ?scope, "Warming cache");

        let mut outcomes = group
            .loader()
            .keys()
            .scan(false, |stopped, item| {
                // Yield the first enumeration error, then end the stream
                if *stopped {
                    return future::ready(None);
                }
                *stopped = item.is_err();
                future::ready(Some(item))
            })
            .map(move |item| async move {
                let key = match item {
                    Ok(key) => key,
                    Err(e) => return Outcome::Enumeration(e),
                };
                if scope == WarmScope::OwnedOnly && !group.owned_by_self(&key) {
                    return Outcome::Skipped;
                }
                match group.get(&key).await {
                    Ok(_) => Outcome::Loaded,
                    Err(e) => Outcome::Failed(key, e),
                }
            })
            .buffer_unordered(concurrency);

        let mut report = WarmReport::default();
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Outcome::Loaded => report.loaded += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed(key, e) => {
                    warn!(group = %group.name(), key = ?key, error = %e, "Failed to warm key");
                    report.failed.push((key, e));
                }
                Outcome::Enumeration(e) => {
                    warn!(group = %group.name(), error = %e, "Key enumeration failed");
                    report.enumeration_error = Some(e);
                    continue;
                }
            }
            report.total += 1;
        }
        report.elapsed = started.elapsed();

        if let Some(e) = &report.enumeration_error {
            if report.loaded == 0 {
                return Err(e.clone().into());
            }
        }

        if report.all_failed() {
            let (_, first) = &report.failed[0];
            return Err(first.clone());
        }

        info!(
            group = %group.name(),
            total = report.total,
            loaded = report.loaded,
            skipped = report.skipped,
            failed = report.failed.len(),
            "warmed cache in {:?}",
            report.elapsed
        );
        Ok(report)
    }
}
