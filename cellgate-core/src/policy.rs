//! TTL policy by request class and response status.
//!
//! | Request class | Status | Fresh window |
//! |---|---|---|
//! | [`RequestClass::Auth`] | 200, 401, 403 | 1 hour |
//! | [`RequestClass::Resource`] | 200 | 10 years |
//! | [`RequestClass::Resource`] | 400, 404, 422 | 1 minute |
//! | [`RequestClass::Public`] | 200 | configurable, 1 minute by default |
//! | any | anything else | not cached |
//!
//! Successful resource and public entries can additionally be served stale for
//! [`TtlPolicy::stale_while_revalidate`] past freshness while a background
//! refresh runs. Client-error entries get no stale window, so a cached 404 is
//! refetched in the foreground once its minute is up. Resource and public
//! entries are retained for [`TtlPolicy::stale_if_error`] past that so they can
//! stand in for a failing upstream. Auth decisions get neither: an expired
//! decision is always re-checked.

use std::time::Duration;

/// Fresh window for cached authorization decisions.
pub const AUTH_TTL: Duration = Duration::from_secs(60 * 60);
/// Fresh window for successful resource responses.
pub const RESOURCE_OK_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
/// Fresh window for client-error resource responses (400, 404, 422).
pub const RESOURCE_CLIENT_ERROR_TTL: Duration = Duration::from_secs(60);
/// Default fresh window for public pass-through endpoints.
pub const PUBLIC_TTL: Duration = Duration::from_secs(60);
/// Default stale-while-revalidate window for successful entries.
pub const STALE_WHILE_REVALIDATE: Duration = Duration::from_secs(60);
/// Default retention of expired entries for error fallback.
pub const STALE_IF_ERROR: Duration = Duration::from_secs(24 * 60 * 60);

/// Class of a cacheable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Authorization sub-request.
    Auth,
    /// Protected resource request.
    Resource,
    /// Unauthenticated pass-through endpoint (version, health, docs).
    Public,
}

impl RequestClass {
    /// Returns the class as a string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Auth => "auth",
            RequestClass::Resource => "resource",
            RequestClass::Public => "public",
        }
    }

    /// Whether entries of this class may be served past freshness.
    pub const fn allows_stale(&self) -> bool {
        !matches!(self, RequestClass::Auth)
    }
}

/// Result of a cache decision.
///
/// Both variants keep the entity so the caller can always pass it on.
#[derive(Debug)]
pub enum CachePolicy<C, N> {
    /// Entity should be cached.
    Cacheable(C),
    /// Entity should not be cached; pass through directly.
    NonCacheable(N),
}

/// Lifetimes applied to a single entry when it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityPolicy {
    /// Time from storing until the entry stops being fresh.
    pub fresh: Duration,
    /// Additional time the entry may be served stale while it is refreshed.
    pub stale: Duration,
    /// Additional time an expired entry is kept for upstream-error fallback.
    pub retain: Duration,
}

/// Status-class TTL table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Fresh window for public endpoints.
    pub public_ttl: Duration,
    /// Stale-while-revalidate window for successful resource and public entries.
    pub stale_while_revalidate: Duration,
    /// Stale-if-error retention for resource and public entries.
    pub stale_if_error: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            public_ttl: PUBLIC_TTL,
            stale_while_revalidate: STALE_WHILE_REVALIDATE,
            stale_if_error: STALE_IF_ERROR,
        }
    }
}

impl TtlPolicy {
    /// Returns the fresh window for a response, or `None` when the status is
    /// not cacheable for the class.
    pub fn fresh_ttl(&self, class: RequestClass, status: u16) -> Option<Duration> {
        match (class, status) {
            (RequestClass::Auth, 200 | 401 | 403) => Some(AUTH_TTL),
            (RequestClass::Resource, 200) => Some(RESOURCE_OK_TTL),
            (RequestClass::Resource, 400 | 404 | 422) => Some(RESOURCE_CLIENT_ERROR_TTL),
            (RequestClass::Public, 200) => Some(self.public_ttl),
            _ => None,
        }
    }

    /// Full entity policy for a response of `class` with `status`.
    pub fn entity_policy(&self, class: RequestClass, status: u16) -> Option<EntityPolicy> {
        let fresh = self.fresh_ttl(class, status)?;
        let (stale, retain) = match (class.allows_stale(), status) {
            (true, 200) => (self.stale_while_revalidate, self.stale_if_error),
            (true, _) => (Duration::ZERO, self.stale_if_error),
            (false, _) => (Duration::ZERO, Duration::ZERO),
        };
        Some(EntityPolicy {
            fresh,
            stale,
            retain,
        })
    }

    /// Classifies a response as cacheable or not, keeping it either way.
    pub fn decide<T>(
        &self,
        class: RequestClass,
        status: u16,
        response: T,
    ) -> CachePolicy<(T, EntityPolicy), T> {
        match self.entity_policy(class, status) {
            Some(policy) => CachePolicy::Cacheable((response, policy)),
            None => CachePolicy::NonCacheable(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_decisions_cache_allow_and_deny_for_an_hour() {
        let policy = TtlPolicy::default();
        for status in [200, 401, 403] {
            let entity = policy.entity_policy(RequestClass::Auth, status).unwrap();
            assert_eq!(entity.fresh, AUTH_TTL);
            assert_eq!(entity.stale, Duration::ZERO);
            assert_eq!(entity.retain, Duration::ZERO);
        }
        assert!(policy.entity_policy(RequestClass::Auth, 500).is_none());
        assert!(policy.entity_policy(RequestClass::Auth, 404).is_none());
    }

    #[test]
    fn resource_buckets() {
        let policy = TtlPolicy::default();
        assert_eq!(
            policy.fresh_ttl(RequestClass::Resource, 200),
            Some(RESOURCE_OK_TTL)
        );
        for status in [400, 404, 422] {
            assert_eq!(
                policy.fresh_ttl(RequestClass::Resource, status),
                Some(Duration::from_secs(60))
            );
        }
        for status in [201, 204, 302, 401, 403, 500, 502, 503, 504] {
            assert_eq!(policy.fresh_ttl(RequestClass::Resource, status), None);
        }
    }

    #[test]
    fn public_ttl_is_configurable() {
        let policy = TtlPolicy {
            public_ttl: Duration::from_secs(5),
            ..TtlPolicy::default()
        };
        assert_eq!(
            policy.fresh_ttl(RequestClass::Public, 200),
            Some(Duration::from_secs(5))
        );
        assert_eq!(policy.fresh_ttl(RequestClass::Public, 404), None);
    }

    #[test]
    fn stale_windows_apply_to_resources_only() {
        let policy = TtlPolicy {
            stale_while_revalidate: Duration::from_secs(30),
            ..TtlPolicy::default()
        };
        let resource = policy.entity_policy(RequestClass::Resource, 200).unwrap();
        assert_eq!(resource.stale, Duration::from_secs(30));
        assert_eq!(resource.retain, STALE_IF_ERROR);

        let auth = policy.entity_policy(RequestClass::Auth, 200).unwrap();
        assert_eq!(auth.stale, Duration::ZERO);
    }

    #[test]
    fn successful_entries_are_revalidated_in_the_background_by_default() {
        let policy = TtlPolicy::default();
        let public = policy.entity_policy(RequestClass::Public, 200).unwrap();
        assert_eq!(public.fresh, PUBLIC_TTL);
        assert_eq!(public.stale, STALE_WHILE_REVALIDATE);
        assert!(public.stale > Duration::ZERO);
        assert_eq!(public.retain, STALE_IF_ERROR);
    }

    #[test]
    fn client_errors_have_no_stale_window() {
        let policy = TtlPolicy::default();
        for status in [400, 404, 422] {
            let entity = policy.entity_policy(RequestClass::Resource, status).unwrap();
            assert_eq!(entity.stale, Duration::ZERO);
            assert_eq!(entity.retain, STALE_IF_ERROR);
        }
    }
}
