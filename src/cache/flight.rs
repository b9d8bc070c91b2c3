//! Per-key deduplication of concurrent loads ("single flight").
//!
//! The first caller for a key becomes the owner of an in-flight call; callers
//! arriving while it runs subscribe to the same result instead of starting a
//! second load. Results are not remembered once delivered.

use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

type Slot = Option<Result<Bytes>>;

/// Registry of in-flight calls keyed by cache key.
#[derive(Debug, Default)]
pub struct CallGroup {
    calls: Arc<Mutex<HashMap<Bytes, watch::Sender<Slot>>>>,
}

/// Whether a caller started the call or joined one already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// This caller started the load.
    Leader,
    /// This caller joined a load already in flight.
    Follower,
}

impl CallGroup {
    /// Create an empty call group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` for `key` unless a call is already in flight, and wait for the
    /// shared result.
    pub async fn work<F, Fut>(&self, key: &Bytes, f: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let (rx, _) = self.join(key, f);
        Self::wait(rx).await
    }

    /// Register interest in `key`, starting `f` on its own task if nobody else
    /// has. The returned receiver yields the result exactly once.
    ///
    /// The call runs detached from the caller: dropping the receiver (a caller
    /// timing out or being cancelled) never cancels the load for others.
    pub fn join<F, Fut>(&self, key: &Bytes, f: F) -> (watch::Receiver<Slot>, Flight)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let rx = {
            let mut calls = self.calls.lock();
            if let Some(tx) = calls.get(key) {
                trace!(key = ?key, "Joining in-flight call");
                return (tx.subscribe(), Flight::Follower);
            }

            let (tx, rx) = watch::channel(None);
            calls.insert(key.clone(), tx);
            rx
        };

        let fut = f();
        let guard = Completion {
            calls: self.calls.clone(),
            key: key.clone(),
            done: false,
        };
        tokio::spawn(async move {
            let mut guard = guard;
            let result = fut.await;
            guard.complete(result);
        });

        (rx, Flight::Leader)
    }

    /// Wait on a receiver obtained from [`join`](Self::join).
    pub async fn wait(mut rx: watch::Receiver<Slot>) -> Result<Bytes> {
        match rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot
                .clone()
                .unwrap_or_else(|| Err(Error::Internal("in-flight call produced no result".into()))),
            Err(_) => Err(Error::Internal("in-flight call abandoned".into())),
        }
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Delivers the result and frees the key, even if the load panics.
struct Completion {
    calls: Arc<Mutex<HashMap<Bytes, watch::Sender<Slot>>>>,
    key: Bytes,
    done: bool,
}

impl Completion {
    fn complete(&mut self, result: Result<Bytes>) {
        // Removal and delivery share one critical section: a caller arriving
        // afterwards starts a fresh call, one arriving before sees the result.
        let mut calls = self.calls.lock();
        if let Some(tx) = calls.remove(&self.key) {
            tx.send_replace(Some(result));
        }
        self.done = true;
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.done {
            self.complete(Err(Error::Internal("load task panicked".into())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_single_call() {
        let group = CallGroup::new();
        let key = Bytes::from_static(b"key");

        let value = group
            .work(&key, || async { Ok(Bytes::from_static(b"value")) })
            .await
            .unwrap();

        assert_eq!(value, Bytes::from_static(b"value"));
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let group = Arc::new(CallGroup::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let key = Bytes::from_static(b"hot");

        let mut receivers = Vec::new();
        for _ in 0..10 {
            let calls = calls.clone();
            let release = release.clone();
            let (rx, _) = group.join(&key, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok(Bytes::from_static(b"shared"))
            });
            receivers.push(rx);
        }

        assert_eq!(group.in_flight(), 1);
        release.notify_one();

        for rx in receivers {
            assert_eq!(CallGroup::wait(rx).await.unwrap(), Bytes::from_static(b"shared"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_shared_by_all_waiters() {
        let group = CallGroup::new();
        let release = Arc::new(Notify::new());
        let key = Bytes::from_static(b"missing");

        let r = release.clone();
        let (first, flight) = group.join(&key, move || async move {
            r.notified().await;
            Err(LoadError::NotFound.into())
        });
        assert_eq!(flight, Flight::Leader);

        let (second, flight) = group.join(&key, || async { Ok(Bytes::new()) });
        assert_eq!(flight, Flight::Follower);

        release.notify_one();
        assert!(CallGroup::wait(first).await.unwrap_err().is_not_found());
        assert!(CallGroup::wait(second).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_result_not_cached_after_completion() {
        let group = CallGroup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = Bytes::from_static(b"k");

        for _ in 0..3 {
            let calls = calls.clone();
            group
                .work(&key, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Bytes::new())
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_cancel_call() {
        let group = CallGroup::new();
        let key = Bytes::from_static(b"slow");

        let waited = tokio::time::timeout(
            Duration::from_millis(10),
            group.work(&key, || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Bytes::from_static(b"late"))
            }),
        )
        .await;
        assert!(waited.is_err());

        // A later caller joins the still-running call
        let (rx, flight) = group.join(&key, || async { Ok(Bytes::from_static(b"fresh")) });
        assert_eq!(flight, Flight::Follower);
        assert_eq!(CallGroup::wait(rx).await.unwrap(), Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn test_panicking_call_releases_waiters() {
        let group = CallGroup::new();
        let key = Bytes::from_static(b"boom");

        let result = group
            .work(&key, || async {
                if true {
                    panic!("loader exploded");
                }
                Ok(Bytes::new())
            })
            .await;

        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(group.in_flight(), 0);
    }
}
