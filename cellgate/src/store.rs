//! The cache store: lookup, single-flight fetch, stale serving and error fallback.
//!
//! | Entry state | Action | Reported status |
//! |---|---|---|
//! | none | single-flight fetch | `MISS` |
//! | fresh | serve | `HIT` |
//! | stale | serve, spawn one background refresh | `STALE` (first) / `UPDATING` |
//! | expired | single-flight fetch | `EXPIRED` |
//! | expired, fetch failed, entry retained | serve the old entry | `STALE` |
//!
//! A fetch counts as failed when the upstream call errors or returns a
//! response for which [`CacheableResponse::is_upstream_failure`] holds. With
//! no retained entry the failure propagates: errors as [`CacheError`], failure
//! responses as-is.
//!
//! Fetches run detached from the caller (see [`ConcurrencyManager`]) and store
//! their result before any waiter is woken, so a refresh or a late joiner never
//! sees a half-written entry. Callers that joined a running fetch get the
//! response through [`CacheableResponse::into_shared`].

use std::fmt;
use std::sync::Arc;

use cellgate_core::{
    CacheKey, CachePolicy, CacheState, CacheStatus, CacheValue, CacheableResponse, RequestClass,
    SystemTimeProvider, TimeProvider, TtlPolicy, Upstream,
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::concurrency::{ConcurrencyManager, FlightRole};
use crate::error::CacheError;
use crate::format;
use crate::offload::{OffloadConfig, OffloadManager};

#[cfg(feature = "metrics")]
use crate::metrics::{CACHE_ERROR_FALLBACKS, CACHE_LOOKUPS, UPSTREAM_FETCH_DURATION};

/// Response served for a lookup together with its cache outcome.
#[derive(Debug, Clone)]
pub struct Lookup<T> {
    /// The response to send.
    pub response: T,
    /// What the cache did.
    pub status: CacheStatus,
}

impl<T> Lookup<T> {
    fn new(response: T, status: CacheStatus) -> Self {
        Self { response, status }
    }
}

struct Inner<T, E> {
    backend: Arc<dyn Backend>,
    policy: TtlPolicy,
    clock: Arc<dyn TimeProvider>,
    flights: ConcurrencyManager<Result<T, E>>,
    offload: OffloadManager,
}

/// Shared cache store.
///
/// Cheap to clone; clones share the backend, the single-flight slots and the
/// background refresh tasks.
pub struct CacheStore<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for CacheStore<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for CacheStore<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.inner.backend.name())
            .field("policy", &self.inner.policy)
            .field("flights", &self.inner.flights)
            .finish()
    }
}

impl<T, E> CacheStore<T, E>
where
    T: CacheableResponse + Serialize + DeserializeOwned,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// TTL table in use.
    pub fn policy(&self) -> &TtlPolicy {
        &self.inner.policy
    }

    /// Background refresh manager, for shutdown and inspection.
    pub fn offload(&self) -> &OffloadManager {
        &self.inner.offload
    }

    /// Returns the cached response for `key`, fetching it through `upstream`
    /// when there is no usable entry.
    ///
    /// `request` and `upstream` are consumed by whichever fetch needs them
    /// (foreground or background); on a fresh hit they are dropped unused.
    pub async fn get_or_fetch<Req, U>(
        &self,
        key: CacheKey,
        class: RequestClass,
        request: Req,
        upstream: U,
    ) -> Result<Lookup<T>, CacheError<E>>
    where
        Req: Send + 'static,
        U: Upstream<Req, Response = Result<T, E>> + Send + 'static,
        U::Future: 'static,
    {
        let cached = self.read(&key).await;
        let now = self.inner.clock.now();

        let lookup = match cached.map(|value| value.cache_state(now)) {
            Some(CacheState::Fresh(value)) => Ok(Lookup::new(value.into_inner(), CacheStatus::Hit)),
            Some(CacheState::Stale(value)) => {
                let spawned = self.refresh_in_background(key, class, request, upstream);
                let status = if spawned {
                    CacheStatus::Stale
                } else {
                    CacheStatus::Updating
                };
                Ok(Lookup::new(value.into_inner(), status))
            }
            Some(CacheState::Expired(value)) => {
                self.fetch(key, class, request, upstream, Some(value)).await
            }
            None => self.fetch(key, class, request, upstream, None).await,
        };

        #[cfg(feature = "metrics")]
        {
            let status = match &lookup {
                Ok(lookup) => lookup.status,
                Err(error) => error.status(),
            };
            metrics::counter!(
                *CACHE_LOOKUPS,
                "status" => status.as_str(),
                "class" => class.as_str()
            )
            .increment(1);
        }

        lookup
    }

    /// Drops the entry stored under `key`.
    pub async fn invalidate(&self, key: &CacheKey) {
        if let Err(error) = self.inner.backend.remove(key).await {
            warn!(%key, %error, "cache remove failed");
        }
    }

    async fn fetch<Req, U>(
        &self,
        key: CacheKey,
        class: RequestClass,
        request: Req,
        upstream: U,
        previous: Option<CacheValue<T>>,
    ) -> Result<Lookup<T>, CacheError<E>>
    where
        Req: Send + 'static,
        U: Upstream<Req, Response = Result<T, E>> + Send + 'static,
        U::Future: 'static,
    {
        let status = if previous.is_some() {
            CacheStatus::Expired
        } else {
            CacheStatus::Miss
        };

        let flight = self.inner.flights.run(&key, || {
            self.clone()
                .fetch_and_store(key.clone(), class, request, upstream)
        });
        let role = flight.role();
        let outcome = match (role, flight.wait().await) {
            (FlightRole::Follower, Ok(result)) => Ok(result.map(T::into_shared)),
            (_, outcome) => outcome,
        };

        let now = self.inner.clock.now();
        let fallback = previous.filter(|value| class.allows_stale() && value.is_retained(now));

        match (outcome, fallback) {
            (Ok(Ok(response)), Some(previous)) if response.is_upstream_failure() => {
                warn!(%key, status = response.status(), "upstream failure response, serving stale entry");
                Ok(self.fallback(previous))
            }
            (Ok(Ok(response)), _) => Ok(Lookup::new(response, status)),
            (Ok(Err(error)), Some(previous)) => {
                warn!(%key, %error, "upstream error, serving stale entry");
                Ok(self.fallback(previous))
            }
            (Ok(Err(source)), None) => Err(CacheError::Upstream { source, status }),
            (Err(error), Some(previous)) => {
                warn!(%key, %error, "fetch aborted, serving stale entry");
                Ok(self.fallback(previous))
            }
            (Err(source), None) => Err(CacheError::Concurrency { source, status }),
        }
    }

    fn fallback(&self, previous: CacheValue<T>) -> Lookup<T> {
        #[cfg(feature = "metrics")]
        metrics::counter!(*CACHE_ERROR_FALLBACKS).increment(1);
        Lookup::new(previous.into_inner(), CacheStatus::Stale)
    }

    /// Spawns a deduplicated refresh. Returns `false` when one was already running.
    fn refresh_in_background<Req, U>(
        &self,
        key: CacheKey,
        class: RequestClass,
        request: Req,
        upstream: U,
    ) -> bool
    where
        Req: Send + 'static,
        U: Upstream<Req, Response = Result<T, E>> + Send + 'static,
        U::Future: 'static,
    {
        let store = self.clone();
        let task_key = key.clone();
        self.inner.offload.spawn_with_key(key, async move {
            let flight = store.inner.flights.run(&task_key, || {
                store
                    .clone()
                    .fetch_and_store(task_key.clone(), class, request, upstream)
            });
            match flight.wait().await {
                Ok(Ok(response)) => {
                    debug!(key = %task_key, status = response.status(), "background refresh finished")
                }
                Ok(Err(error)) => warn!(key = %task_key, %error, "background refresh failed"),
                Err(error) => warn!(key = %task_key, %error, "background refresh aborted"),
            }
        })
    }

    /// Leader side of a flight: call upstream and store a cacheable result.
    async fn fetch_and_store<Req, U>(
        self,
        key: CacheKey,
        class: RequestClass,
        request: Req,
        mut upstream: U,
    ) -> Result<T, E>
    where
        U: Upstream<Req, Response = Result<T, E>>,
    {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let response = upstream.call(request).await;

        #[cfg(feature = "metrics")]
        metrics::histogram!(*UPSTREAM_FETCH_DURATION, "class" => class.as_str())
            .record(start.elapsed().as_secs_f64());

        let response = response?;
        if !response.is_storable() {
            debug!(%key, "upstream forbids storing the response");
            return Ok(response);
        }

        match self
            .inner
            .policy
            .decide(class, response.status(), response)
        {
            CachePolicy::Cacheable((response, policy)) => {
                let value = CacheValue::with_policy(response, self.inner.clock.now(), &policy);
                self.write(&key, &value).await;
                debug!(%key, fresh_until = %value.fresh_until(), "stored response");
                Ok(value.into_inner())
            }
            CachePolicy::NonCacheable(response) => {
                debug!(%key, status = response.status(), "response not cacheable");
                Ok(response)
            }
        }
    }

    async fn read(&self, key: &CacheKey) -> Option<CacheValue<T>> {
        match self.inner.backend.read(key).await {
            Ok(Some(raw)) => match format::decode(raw) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(%key, %error, "dropping undecodable cache entry");
                    self.invalidate(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(%key, backend = self.inner.backend.name(), %error, "cache read failed");
                None
            }
        }
    }

    async fn write(&self, key: &CacheKey, value: &CacheValue<T>) {
        let raw = match format::encode(value) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%key, %error, "failed to encode response for caching");
                return;
            }
        };
        if let Err(error) = self.inner.backend.write(key, raw).await {
            warn!(%key, backend = self.inner.backend.name(), %error, "cache write failed");
        }
    }
}

/// Builder for [`CacheStore`].
pub struct CacheStoreBuilder {
    backend: Arc<dyn Backend>,
    policy: TtlPolicy,
    clock: Arc<dyn TimeProvider>,
    offload: OffloadConfig,
}

impl CacheStoreBuilder {
    /// Creates a builder around `backend` with default policy, clock and
    /// background refresh settings.
    pub fn new<B>(backend: B) -> Self
    where
        B: Backend + 'static,
    {
        Self {
            backend: Arc::new(backend),
            policy: TtlPolicy::default(),
            clock: Arc::new(SystemTimeProvider),
            offload: OffloadConfig::default(),
        }
    }

    /// Sets the TTL table.
    pub fn policy(self, policy: TtlPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Sets the clock used for freshness decisions.
    pub fn clock<C>(self, clock: C) -> Self
    where
        C: TimeProvider + 'static,
    {
        Self {
            clock: Arc::new(clock),
            ..self
        }
    }

    /// Sets the background refresh configuration.
    pub fn offload(self, offload: OffloadConfig) -> Self {
        Self { offload, ..self }
    }

    /// Builds the store.
    pub fn build<T, E>(self) -> CacheStore<T, E>
    where
        T: CacheableResponse + Serialize + DeserializeOwned,
        E: std::error::Error + Clone + Send + Sync + 'static,
    {
        CacheStore {
            inner: Arc::new(Inner {
                backend: self.backend,
                policy: self.policy,
                clock: self.clock,
                flights: ConcurrencyManager::new(),
                offload: OffloadManager::new(self.offload),
            }),
        }
    }
}
