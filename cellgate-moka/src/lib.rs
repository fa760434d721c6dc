#![warn(missing_docs)]
//! # cellgate-moka
//!
//! In-memory [`Backend`](cellgate::Backend) for cellgate built on
//! [`moka`](https://docs.rs/moka).
//!
//! - capacity is measured in bytes (key size plus encoded value size)
//! - space pressure evicts the least recently accessed entry
//! - each entry is reclaimed once its `retain_until` passes
//!
//! Writes replace the whole entry at once, so concurrent reads never see a
//! partially updated value.

mod backend;
mod builder;

pub use backend::MokaBackend;
pub use builder::MokaBackendBuilder;
pub use moka::policy::EvictionPolicy;
