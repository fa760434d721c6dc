//! Cache outcome reported to clients and logs.

use std::fmt;

/// Outcome of a cache lookup for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStatus {
    /// A fresh entry was served.
    Hit,
    /// No entry existed; the response came from upstream.
    #[default]
    Miss,
    /// An expired entry existed and was replaced by an upstream response.
    Expired,
    /// A stale entry was served, either while triggering a refresh or because
    /// the upstream failed.
    Stale,
    /// A stale entry was served while another request's refresh was running.
    Updating,
    /// The request is not cacheable and went straight to upstream.
    Bypass,
}

impl CacheStatus {
    /// Returns the header/log representation.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Expired => "EXPIRED",
            CacheStatus::Stale => "STALE",
            CacheStatus::Updating => "UPDATING",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
