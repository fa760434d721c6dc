//! # cellgate-server
//!
//! HTTP edge gateway in front of a single resource API.
//!
//! Every protected request is authorized by a sub-request to the upstream's
//! auth endpoint; the decision and the resource response are both cached in
//! one [`cellgate::CacheStore`]. Responses get CORS headers for the caller's
//! origin, optional gzip, and `X-Cache-Status` / `X-Auth-Cache-Status` /
//! `X-Total-Time` diagnostics. One access log record is emitted per request
//! under the [`access_log::ACCESS_TARGET`] target.
//!
//! The binary (`cellgate`) wires [`Config`] to a moka-backed store, an
//! [`HttpUpstream`] and [`serve`].

pub mod access_log;
pub mod config;
pub mod error;
pub mod gateway;
pub mod service;
pub mod upstream;

pub use config::{Config, LogFormat};
pub use error::{ConfigError, UpstreamError};
pub use gateway::{Gateway, GatewayBuilder, GatewayStore};
pub use service::{GatewayService, serve};
pub use upstream::HttpUpstream;
