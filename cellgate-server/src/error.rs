use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

type Source = Arc<dyn StdError + Send + Sync>;

/// Failure talking to the upstream.
///
/// Cloneable because one fetch result is shared by every single-flight waiter.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// The connect or overall timeout elapsed.
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
    /// No connection could be established.
    #[error("upstream connection failed: {0}")]
    Connect(Source),
    /// The connection failed while the request or response was in transit.
    #[error("upstream request failed: {0}")]
    Request(Source),
    /// The gateway could not build the upstream request.
    #[error("invalid upstream request: {0}")]
    InvalidRequest(Source),
}

impl UpstreamError {
    /// Status returned to the client when no cached fallback exists.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    pub(crate) fn connect(error: impl StdError + Send + Sync + 'static) -> Self {
        UpstreamError::Connect(Arc::new(error))
    }

    pub(crate) fn request(error: impl StdError + Send + Sync + 'static) -> Self {
        UpstreamError::Request(Arc::new(error))
    }

    pub(crate) fn invalid(error: impl StdError + Send + Sync + 'static) -> Self {
        UpstreamError::InvalidRequest(Arc::new(error))
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid upstream url {url:?}: {reason}")]
    UpstreamUrl { url: String, reason: String },
    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}
