//! Builder for [`MokaBackend`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use cellgate_core::{CacheKey, CacheValue, Raw, SystemTimeProvider, TimeProvider};
use moka::Expiry;
use moka::future::{Cache, CacheBuilder};
use moka::policy::EvictionPolicy;

use crate::backend::MokaBackend;

/// Expires each entry at its `retain_until`, the last instant it can still
/// serve as an error fallback.
///
/// `retain_until` is stamped by the store's clock, so the remaining lifetime
/// must be measured against that same clock.
#[derive(Clone, Debug)]
struct Expiration {
    clock: Arc<dyn TimeProvider>,
}

impl Expiry<CacheKey, CacheValue<Raw>> for Expiration {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CacheValue<Raw>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.time_to_reclaim(self.clock.now()))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CacheValue<Raw>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // A refresh replaces the entry, so its new lifetime wins.
        Some(value.time_to_reclaim(self.clock.now()))
    }
}

/// Builder for [`MokaBackend`].
///
/// Capacity is always in bytes: resource bodies range from a few bytes to
/// many megabytes, so counting entries says nothing about memory use.
///
/// ```
/// use cellgate_moka::MokaBackend;
///
/// let backend = MokaBackend::builder(512 * 1024 * 1024)
///     .label("resources")
///     .build();
/// ```
#[derive(Debug)]
pub struct MokaBackendBuilder {
    max_bytes: u64,
    label: String,
    eviction_policy: Option<EvictionPolicy>,
    clock: Arc<dyn TimeProvider>,
}

impl MokaBackendBuilder {
    /// Creates a builder for a cache holding at most `max_bytes`.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            label: "moka".to_owned(),
            eviction_policy: None,
            clock: Arc::new(SystemTimeProvider),
        }
    }

    /// Sets the name reported in logs.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Overrides the eviction policy (LRU by default).
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    /// Sets the clock retention deadlines are measured against. Use the same
    /// clock as the store writing into this backend.
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: TimeProvider + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Builds the backend.
    ///
    /// The default policy is LRU so that space pressure evicts the entry
    /// accessed least recently. TinyLFU's admission filter could otherwise
    /// reject a fresh response outright.
    pub fn build(self) -> MokaBackend {
        let policy = self.eviction_policy.unwrap_or_else(EvictionPolicy::lru);
        let cache: Cache<CacheKey, CacheValue<Raw>> = CacheBuilder::new(self.max_bytes)
            .weigher(Self::byte_weigher)
            .eviction_policy(policy)
            .expire_after(Expiration { clock: self.clock })
            .build();

        MokaBackend {
            cache,
            label: self.label,
        }
    }

    fn byte_weigher(key: &CacheKey, value: &CacheValue<Raw>) -> u32 {
        (key.memory_size() + value.memory_size()).min(u32::MAX as usize) as u32
    }
}
