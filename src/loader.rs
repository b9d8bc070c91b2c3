//! The contract between the cache and its backing store.
//!
//! A [`Loader`] is an adapter type owning whatever connection the backing
//! store needs. The cache calls [`Loader::load`] on a true miss and the
//! warmer walks [`Loader::keys`] at startup.

use crate::error::LoadError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};

/// Lazy stream of backing-store keys. Each call to [`Loader::keys`] starts a
/// fresh enumeration.
pub type KeyStream<'a> = BoxStream<'a, Result<Bytes, LoadError>>;

/// Fetches values from the backing store.
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    /// Load the value for `key`.
    ///
    /// A missing key must be reported as [`LoadError::NotFound`]; an empty
    /// value is a legitimate, cacheable result.
    async fn load(&self, key: &[u8]) -> Result<Bytes, LoadError>;

    /// Enumerate every key in the backing store.
    fn keys(&self) -> KeyStream<'_> {
        Box::pin(stream::once(async {
            Err::<Bytes, _>(LoadError::Unavailable(
                "key enumeration not supported by this loader".into(),
            ))
        }))
    }
}
