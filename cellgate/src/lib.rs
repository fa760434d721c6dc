#![warn(missing_docs)]
//! # cellgate
//!
//! The cache store behind the cellgate edge gateway.
//!
//! A single [`CacheStore`] holds both authorization decisions and resource
//! responses. It is the only shared mutable state in the gateway; every
//! mutation goes through it:
//!
//! - **Lookup** - fresh entries are served, stale ones are served while one
//!   background refresh runs ([`offload`])
//! - **Single-flight** - at most one upstream fetch per key
//!   ([`concurrency::ConcurrencyManager`])
//! - **Stale-if-error** - expired but retained entries stand in for a failing
//!   upstream
//! - **Storage** - pluggable [`Backend`] holding bincode-encoded values
//!
//! ## Feature Flags
//!
//! - `metrics` - lookup, single-flight and background refresh metrics via the
//!   `metrics` crate
//!

pub mod backend;
pub mod concurrency;
pub mod error;
pub mod format;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod offload;
pub mod store;

pub use backend::{Backend, BackendResult, DeleteStatus};
pub use cellgate_core::{
    CacheKey, CacheState, CacheStatus, CacheValue, CacheableResponse, CredentialHash, Raw,
    RequestClass, ResourceKey, TimeProvider, TtlPolicy, Upstream,
};
pub use concurrency::{ConcurrencyManager, Flight, FlightRole};
pub use error::{BackendError, CacheError, ConcurrencyError, FormatError};
pub use offload::{OffloadConfig, OffloadManager, TimeoutPolicy};
pub use store::{CacheStore, CacheStoreBuilder, Lookup};
