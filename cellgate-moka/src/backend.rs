use async_trait::async_trait;
use cellgate::{Backend, BackendResult, DeleteStatus};
use cellgate_core::{CacheKey, CacheValue, Raw};
use moka::future::Cache;
use tracing::trace;

use crate::builder::MokaBackendBuilder;

/// In-memory backend bounded by total entry size.
#[derive(Clone)]
pub struct MokaBackend {
    pub(crate) cache: Cache<CacheKey, CacheValue<Raw>>,
    pub(crate) label: String,
}

impl std::fmt::Debug for MokaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaBackend")
            .field("label", &self.label)
            .field("entries", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

impl MokaBackend {
    /// Creates a builder for a cache holding at most `max_bytes`.
    pub fn builder(max_bytes: u64) -> MokaBackendBuilder {
        MokaBackendBuilder::new(max_bytes)
    }

    /// Underlying Moka cache.
    pub fn cache(&self) -> &Cache<CacheKey, CacheValue<Raw>> {
        &self.cache
    }
}

#[async_trait]
impl Backend for MokaBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        Ok(self.cache.get(key).await)
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        trace!(%key, bytes = value.data().len(), "moka insert");
        self.cache.insert(key.clone(), value).await;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        match self.cache.remove(key).await {
            Some(_) => Ok(DeleteStatus::Deleted(1)),
            None => Ok(DeleteStatus::Missing),
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}
