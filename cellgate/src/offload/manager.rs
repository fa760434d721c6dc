//! OffloadManager implementation for background refresh tasks.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cellgate_core::CacheKey;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use super::policy::{OffloadConfig, TimeoutPolicy};

#[cfg(feature = "metrics")]
use crate::metrics::{
    OFFLOAD_TASK_DURATION, OFFLOAD_TASKS_COMPLETED, OFFLOAD_TASKS_DEDUPLICATED,
    OFFLOAD_TASKS_SPAWNED, OFFLOAD_TASKS_TIMEOUT,
};

/// Handle to a spawned offload task.
#[derive(Debug)]
pub struct OffloadHandle {
    id: u64,
    handle: JoinHandle<()>,
}

impl OffloadHandle {
    /// Check if the task is finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
struct OffloadManagerInner {
    config: OffloadConfig,
    tasks: DashMap<CacheKey, OffloadHandle>,
    next_id: AtomicU64,
}

impl OffloadManagerInner {
    fn release(&self, key: &CacheKey, id: u64) {
        self.tasks.remove_if(key, |_, handle| handle.id == id);
    }
}

/// Manager for background refresh tasks.
///
/// Clones share the same task table.
#[derive(Clone, Debug)]
pub struct OffloadManager {
    inner: Arc<OffloadManagerInner>,
}

impl OffloadManager {
    /// Create a new OffloadManager with the given configuration.
    pub fn new(config: OffloadConfig) -> Self {
        Self {
            inner: Arc::new(OffloadManagerInner {
                config,
                tasks: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Create a new OffloadManager with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(OffloadConfig::default())
    }

    /// Spawn a task for `key`.
    ///
    /// With deduplication enabled, nothing is spawned while a task for the
    /// same key is still running. The check and the insert happen under the
    /// same map entry, so two callers racing on one key spawn at most once.
    ///
    /// Returns `true` if the task was spawned, `false` if it was deduplicated.
    pub fn spawn_with_key<F>(&self, key: CacheKey, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deduplicate = self.inner.config.deduplicate;
        match self.inner.tasks.entry(key.clone()) {
            Entry::Occupied(mut running) => {
                if deduplicate && !running.get().is_finished() {
                    debug!(%key, "refresh deduplicated, already in flight");
                    #[cfg(feature = "metrics")]
                    metrics::counter!(*OFFLOAD_TASKS_DEDUPLICATED).increment(1);
                    return false;
                }
                let handle = self.spawn_inner(task, key);
                running.insert(handle);
            }
            Entry::Vacant(vacant) => {
                let handle = self.spawn_inner(task, key);
                vacant.insert(handle);
            }
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(*OFFLOAD_TASKS_SPAWNED).increment(1);

        true
    }

    /// Get the number of currently active tasks.
    pub fn active_task_count(&self) -> usize {
        self.inner.tasks.iter().filter(|e| !e.is_finished()).count()
    }

    /// Clean up finished task handles.
    pub fn cleanup_finished(&self) {
        self.inner.tasks.retain(|_, handle| !handle.is_finished());
    }

    /// Cancel all running tasks.
    pub fn cancel_all(&self) {
        for entry in self.inner.tasks.iter() {
            entry.abort();
        }
    }

    /// Check if a task with the given key is in flight.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inner.tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Wait for all currently tracked tasks to complete.
    pub async fn wait_all(&self) {
        loop {
            self.cleanup_finished();
            if self.inner.tasks.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait for all tasks with a timeout.
    ///
    /// Returns `true` if all tasks completed within the timeout,
    /// `false` if the timeout was reached.
    pub async fn wait_all_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_all()).await.is_ok()
    }

    fn spawn_inner<F>(&self, task: F, key: CacheKey) -> OffloadHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout_policy = self.inner.config.timeout_policy.clone();
        let inner = Arc::clone(&self.inner);
        let span = info_span!("offload_task", key = %key);

        let handle = tokio::spawn(
            async move {
                let start = Instant::now();
                match timeout_policy {
                    TimeoutPolicy::None => task.await,
                    TimeoutPolicy::Cancel(duration) => {
                        if tokio::time::timeout(duration, task).await.is_err() {
                            warn!(%key, "offload task cancelled due to timeout");
                            #[cfg(feature = "metrics")]
                            metrics::counter!(*OFFLOAD_TASKS_TIMEOUT).increment(1);
                        }
                    }
                    TimeoutPolicy::Warn(duration) => {
                        task.await;
                        let elapsed = start.elapsed();
                        if elapsed > duration {
                            warn!(
                                %key,
                                elapsed_ms = elapsed.as_millis(),
                                threshold_ms = duration.as_millis(),
                                "offload task exceeded timeout threshold"
                            );
                        }
                    }
                }
                inner.release(&key, id);
                #[cfg(feature = "metrics")]
                {
                    metrics::counter!(*OFFLOAD_TASKS_COMPLETED).increment(1);
                    metrics::histogram!(*OFFLOAD_TASK_DURATION)
                        .record(start.elapsed().as_secs_f64());
                }
            }
            .instrument(span),
        );

        OffloadHandle { id, handle }
    }
}

impl Default for OffloadManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use cellgate_core::ResourceKey;

    use super::*;

    fn key(path: &str) -> CacheKey {
        CacheKey::Resource(ResourceKey::new("http", "localhost", path, ""))
    }

    #[tokio::test]
    async fn second_spawn_for_same_key_is_deduplicated() {
        let manager = OffloadManager::with_defaults();
        let runs = Arc::new(AtomicUsize::new(0));
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let r = Arc::clone(&runs);
        assert!(manager.spawn_with_key(key("/a"), async move {
            let _ = gate.await;
            r.fetch_add(1, Ordering::SeqCst);
        }));
        let r = Arc::clone(&runs);
        assert!(!manager.spawn_with_key(key("/a"), async move {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(manager.is_in_flight(&key("/a")));

        release.send(()).unwrap();
        manager.wait_all().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!manager.is_in_flight(&key("/a")));
    }

    #[tokio::test]
    async fn key_can_be_reused_after_completion() {
        let manager = OffloadManager::with_defaults();
        assert!(manager.spawn_with_key(key("/b"), async {}));
        manager.wait_all().await;
        assert!(manager.spawn_with_key(key("/b"), async {}));
        manager.wait_all().await;
        assert_eq!(manager.active_task_count(), 0);
    }

    #[tokio::test]
    async fn deduplication_can_be_disabled() {
        let manager = OffloadManager::new(OffloadConfig::builder().deduplicate(false).build());
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        assert!(manager.spawn_with_key(key("/c"), async move {
            let _ = gate.await;
        }));
        assert!(manager.spawn_with_key(key("/c"), async {}));
        release.send(()).ok();
        manager.wait_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_policy_aborts_long_tasks() {
        let manager = OffloadManager::new(
            OffloadConfig::builder()
                .timeout(Duration::from_secs(1))
                .build(),
        );
        let finished = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&finished);
        manager.spawn_with_key(key("/slow"), async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert!(manager.wait_all_timeout(Duration::from_secs(5)).await);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
