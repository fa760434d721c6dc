#![warn(missing_docs)]
//! # cellgate-http
//!
//! HTTP pieces of the cellgate gateway that do not depend on a server:
//!
//! - [`CachedResponse`] - buffered response, the value stored in the cache
//! - [`CredentialAdapter`] - folds `Authorization` and the legacy token header
//!   into one canonical credential
//! - [`CorsPolicy`] - rebuilds cross-origin headers per request
//! - [`GzipNegotiator`] - on-the-wire gzip by media type
//! - [`PathNormalizer`] - strips the `/api/<service>` mount prefix
//! - [`headers`] - hop-by-hop stripping and diagnostic headers

pub mod compress;
pub mod cors;
pub mod credential;
pub mod headers;
pub mod path;
mod response;

pub use compress::GzipNegotiator;
pub use cors::CorsPolicy;
pub use credential::{Credential, CredentialAdapter};
pub use headers::Diagnostics;
pub use path::PathNormalizer;
pub use response::{CachedResponse, UpstreamTimings};
