//! Background refresh of stale entries.
//!
//! When a stale entry is served, the store hands the refresh to the
//! [`OffloadManager`] keyed by the entry's [`CacheKey`](cellgate_core::CacheKey).
//! While that task runs, further stale hits for the same key do not spawn
//! another one.
//!
//! # Example
//!
//! ```ignore
//! use cellgate::offload::{OffloadConfig, OffloadManager, TimeoutPolicy};
//!
//! let manager = OffloadManager::new(
//!     OffloadConfig::builder()
//!         .timeout_policy(TimeoutPolicy::Warn(Duration::from_secs(30)))
//!         .build(),
//! );
//!
//! let spawned = manager.spawn_with_key(key, async { /* refresh */ });
//! ```

mod manager;
mod policy;

pub use manager::{OffloadHandle, OffloadManager};
pub use policy::{OffloadConfig, OffloadConfigBuilder, TimeoutPolicy};
