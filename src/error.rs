//! Error types for the distributed cache.
//!
//! Every error is `Clone`: a single load result is fanned out to all callers
//! waiting on the same key, so the error value itself is shared.

use std::io;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the distributed cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The backing store failed (or reported a missing key).
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// Network communication with a peer failed.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// A peer answered with something we could not decode.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The owning peer reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// No group is registered under this name.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The caller's deadline expired before a result was available.
    #[error("operation timed out")]
    Timeout,

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the backing store reported the key as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Load(LoadError::NotFound))
    }

    /// Whether the backing store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Load(LoadError::Unavailable(_)))
    }
}

/// Errors reported by a [`Loader`](crate::loader::Loader).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The backing store has no such key.
    #[error("key not found")]
    NotFound,

    /// The backing store is unreachable; transient.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// Any other backing store failure.
    #[error("{0}")]
    Other(String),
}

/// Network communication errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// The request did not complete within its deadline.
    #[error("request to {addr} timed out")]
    Timeout { addr: String },

    /// Failed to send a message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a message.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Too many outstanding remote calls.
    #[error("too many outstanding peer requests ({limit})")]
    Busy { limit: usize },

    /// I/O error.
    #[error("io error: {0}")]
    Io(String),

    /// Address parse error.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl From<io::Error> for NetworkError {
    fn from(e: io::Error) -> Self {
        NetworkError::Io(e.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Network(e.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Network(NetworkError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err: Error = LoadError::NotFound.into();
        assert!(err.is_not_found());
        assert!(!err.is_unavailable());

        let err: Error = LoadError::Unavailable("redis down".into()).into();
        assert!(err.is_unavailable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_io_error_maps_to_network() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Network(NetworkError::Io(_))));
    }
}
