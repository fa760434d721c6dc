//! Cached value with freshness metadata.
//!
//! Every entry carries four timestamps:
//!
//! ```text
//! stored_at <= fresh_until <= stale_until <= retain_until
//! |-- fresh --|-- stale (revalidate) --|-- expired (error fallback) --|
//! ```
//!
//! - **Fresh** - served directly
//! - **Stale** - served while exactly one background refresh runs
//! - **Expired** - must be refetched; kept until `retain_until` only so it can
//!   stand in for a failing upstream
//!
//! Backends may reclaim the entry once `retain_until` has passed.

use std::mem::size_of;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::Raw;
use crate::policy::EntityPolicy;

/// Freshness state of a cached value at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState<T> {
    /// Within the fresh window.
    Fresh(T),
    /// Past freshness, inside the stale-while-revalidate window.
    Stale(T),
    /// Past the stale window.
    Expired(T),
}

impl<T> CacheState<T> {
    /// Returns the wrapped value regardless of state.
    pub fn into_inner(self) -> T {
        match self {
            CacheState::Fresh(v) | CacheState::Stale(v) | CacheState::Expired(v) => v,
        }
    }
}

/// A cached value with freshness timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue<T> {
    data: T,
    stored_at: DateTime<Utc>,
    fresh_until: DateTime<Utc>,
    stale_until: DateTime<Utc>,
    retain_until: DateTime<Utc>,
}

fn add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl<T> CacheValue<T> {
    /// Creates a value from explicit timestamps.
    ///
    /// Out-of-order timestamps are clamped so that
    /// `stored_at <= fresh_until <= stale_until <= retain_until` always holds.
    pub fn new(
        data: T,
        stored_at: DateTime<Utc>,
        fresh_until: DateTime<Utc>,
        stale_until: DateTime<Utc>,
        retain_until: DateTime<Utc>,
    ) -> Self {
        let fresh_until = fresh_until.max(stored_at);
        let stale_until = stale_until.max(fresh_until);
        let retain_until = retain_until.max(stale_until);
        Self {
            data,
            stored_at,
            fresh_until,
            stale_until,
            retain_until,
        }
    }

    /// Creates a value stored at `now` with lifetimes from `policy`.
    pub fn with_policy(data: T, now: DateTime<Utc>, policy: &EntityPolicy) -> Self {
        let fresh_until = add(now, policy.fresh);
        let stale_until = add(fresh_until, policy.stale);
        let retain_until = add(stale_until, policy.retain);
        Self::new(data, now, fresh_until, stale_until, retain_until)
    }

    /// Returns a reference to the cached data.
    #[inline]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// When the value was stored.
    #[inline]
    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    /// End of the fresh window.
    #[inline]
    pub fn fresh_until(&self) -> DateTime<Utc> {
        self.fresh_until
    }

    /// End of the stale-while-revalidate window.
    #[inline]
    pub fn stale_until(&self) -> DateTime<Utc> {
        self.stale_until
    }

    /// Instant after which the value may be reclaimed.
    #[inline]
    pub fn retain_until(&self) -> DateTime<Utc> {
        self.retain_until
    }

    /// Consumes the value and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data
    }

    /// Replaces the data, keeping the timestamps.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheValue<U> {
        CacheValue {
            data: f(self.data),
            stored_at: self.stored_at,
            fresh_until: self.fresh_until,
            stale_until: self.stale_until,
            retain_until: self.retain_until,
        }
    }

    /// Like [`map`](Self::map) for fallible conversions.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<CacheValue<U>, E> {
        Ok(CacheValue {
            data: f(self.data)?,
            stored_at: self.stored_at,
            fresh_until: self.fresh_until,
            stale_until: self.stale_until,
            retain_until: self.retain_until,
        })
    }

    /// Classifies the value at `now`.
    pub fn cache_state(self, now: DateTime<Utc>) -> CacheState<Self> {
        if now < self.fresh_until {
            CacheState::Fresh(self)
        } else if now < self.stale_until {
            CacheState::Stale(self)
        } else {
            CacheState::Expired(self)
        }
    }

    /// Whether the value may still be served in place of a failed fetch.
    pub fn is_retained(&self, now: DateTime<Utc>) -> bool {
        now < self.retain_until
    }

    /// Time left until the value may be reclaimed, measured from `now`.
    pub fn time_to_reclaim(&self, now: DateTime<Utc>) -> Duration {
        (self.retain_until - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl CacheValue<Raw> {
    /// Returns the estimated memory usage of this cache value in bytes.
    pub fn memory_size(&self) -> usize {
        size_of::<Self>() + self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn timestamps_are_clamped_into_order() {
        let value = CacheValue::new((), at(10), at(5), at(0), at(20));
        assert_eq!(value.fresh_until(), at(10));
        assert_eq!(value.stale_until(), at(10));
        assert_eq!(value.retain_until(), at(20));
    }

    #[test]
    fn states_follow_windows() {
        let policy = EntityPolicy {
            fresh: Duration::from_secs(60),
            stale: Duration::from_secs(30),
            retain: Duration::from_secs(100),
        };
        let value = CacheValue::with_policy("body", at(0), &policy);

        assert!(matches!(value.clone().cache_state(at(59)), CacheState::Fresh(_)));
        assert!(matches!(value.clone().cache_state(at(60)), CacheState::Stale(_)));
        assert!(matches!(value.clone().cache_state(at(90)), CacheState::Expired(_)));
        assert!(value.is_retained(at(189)));
        assert!(!value.is_retained(at(190)));
    }

    #[test]
    fn zero_stale_window_goes_straight_to_expired() {
        let policy = EntityPolicy {
            fresh: Duration::from_secs(60),
            stale: Duration::ZERO,
            retain: Duration::ZERO,
        };
        let value = CacheValue::with_policy("body", at(0), &policy);
        assert!(matches!(value.cache_state(at(61)), CacheState::Expired(_)));
    }

    #[test]
    fn huge_ttl_saturates() {
        let policy = EntityPolicy {
            fresh: Duration::from_secs(u64::MAX),
            stale: Duration::ZERO,
            retain: Duration::ZERO,
        };
        let value = CacheValue::with_policy((), at(0), &policy);
        assert_eq!(value.fresh_until(), DateTime::<Utc>::MAX_UTC);
    }
}
