#![warn(missing_docs)]
//! # cellgate-core
//!
//! Core types of the cellgate edge gateway cache.
//!
//! This crate has no I/O. It defines what is cached and for how long:
//!
//! - **Keys** ([`CacheKey`]) - authorization decisions keyed by a
//!   [`CredentialHash`], resource responses keyed by [`ResourceKey`]
//! - **Values** ([`CacheValue`]) - data plus `stored_at`, `fresh_until`,
//!   `stale_until` and `retain_until` timestamps
//! - **Policy** ([`TtlPolicy`]) - the TTL table by [`RequestClass`] and status
//! - **Outcome** ([`CacheStatus`]) - what the lookup did, as reported to clients
//! - **Time** ([`TimeProvider`]) - the clock every freshness check uses
//! - **Upstream** ([`Upstream`]) - the seam to the resource API
//!
//! ## Feature Flags
//!
//! - `test-helpers` - exposes `MockTimeProvider`, a manually advanced clock
//!

pub mod key;
pub mod policy;
pub mod response;
pub mod status;
pub mod time;
pub mod upstream;
pub mod value;

pub use key::{CacheKey, CredentialHash, ResourceKey};
pub use policy::{CachePolicy, EntityPolicy, RequestClass, TtlPolicy};
pub use response::CacheableResponse;
pub use status::CacheStatus;
#[cfg(feature = "test-helpers")]
pub use time::MockTimeProvider;
pub use time::{SystemTimeProvider, TimeProvider};
pub use upstream::Upstream;
pub use value::{CacheState, CacheValue};

/// Raw byte data type used for serialized cache values.
/// Using `Bytes` provides efficient zero-copy cloning via reference counting.
pub type Raw = bytes::Bytes;
