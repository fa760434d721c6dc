//! Response-side hooks used by the cache store.

/// A response the cache store can classify and keep.
pub trait CacheableResponse: Clone + Send + Sync + 'static {
    /// HTTP status code of the response.
    fn status(&self) -> u16;

    /// Whether the upstream allowed this response to be stored at all.
    ///
    /// Returning `false` passes the response through uncached regardless of
    /// its status.
    fn is_storable(&self) -> bool {
        true
    }

    /// Whether this response signals an upstream failure that a retained
    /// entry may stand in for.
    fn is_upstream_failure(&self) -> bool {
        matches!(self.status(), 500 | 502 | 503 | 504)
    }

    /// The response as handed to a caller that joined someone else's fetch.
    ///
    /// Override to drop data describing the exchange itself rather than the
    /// resource, such as upstream timings.
    fn into_shared(self) -> Self {
        self
    }
}
