//! Error types for cache store operations.

use cellgate_core::CacheStatus;
use thiserror::Error;

/// Error type for backend operations.
///
/// Backend failures are never surfaced to clients: the store logs them and
/// treats the lookup as a miss.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Internal backend error, state or computation error.
    ///
    /// Any error not related to network interaction.
    #[error(transparent)]
    InternalError(Box<dyn std::error::Error + Send + Sync>),

    /// Network interaction error.
    #[error(transparent)]
    ConnectionError(Box<dyn std::error::Error + Send + Sync>),

    /// Serialization or deserialization error.
    #[error(transparent)]
    FormatError(#[from] FormatError),
}

/// Value encoding error.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Encoding a value failed.
    #[error("failed to encode cache value: {0}")]
    Serialize(#[source] bincode::error::EncodeError),

    /// Decoding a stored value failed.
    #[error("failed to decode cache value: {0}")]
    Deserialize(#[source] bincode::error::DecodeError),
}

/// Error while waiting on a single-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConcurrencyError {
    /// The fetch task ended without producing a result (it panicked or was
    /// aborted).
    #[error("in-flight fetch ended without a result")]
    Closed,
}

/// Lookup failure with no usable cached fallback.
#[derive(Debug, Error)]
pub enum CacheError<E>
where
    E: std::error::Error + 'static,
{
    /// The upstream call failed.
    #[error("upstream request failed: {source}")]
    Upstream {
        /// Underlying upstream error.
        #[source]
        source: E,
        /// Cache outcome of the lookup that led to the upstream call.
        status: CacheStatus,
    },

    /// The shared fetch ended without a result.
    #[error("{source}")]
    Concurrency {
        /// Underlying error.
        #[source]
        source: ConcurrencyError,
        /// Cache outcome of the lookup that led to the upstream call.
        status: CacheStatus,
    },
}

impl<E> CacheError<E>
where
    E: std::error::Error + 'static,
{
    /// Cache outcome to report alongside the error.
    pub fn status(&self) -> CacheStatus {
        match self {
            CacheError::Upstream { status, .. } | CacheError::Concurrency { status, .. } => *status,
        }
    }
}
