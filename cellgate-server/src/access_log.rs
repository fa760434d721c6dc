//! One structured record per request.

use std::net::SocketAddr;
use std::time::Duration;

use cellgate_core::CacheStatus;
use cellgate_http::UpstreamTimings;
use cellgate_http::headers::format_seconds;
use chrono::{DateTime, SecondsFormat, Utc};
use http::{Method, StatusCode};
use tracing::info;

/// Target of access log events, for filtering (`cellgate::access=info`).
pub const ACCESS_TARGET: &str = "cellgate::access";

/// Fields of one access log line.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub time: DateTime<Utc>,
    pub remote_addr: Option<SocketAddr>,
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    pub bytes_sent: usize,
    pub user_agent: Option<String>,
    pub gzip_ratio: Option<f64>,
    pub request_time: Duration,
    pub upstream: UpstreamTimings,
    pub cache_status: Option<CacheStatus>,
    pub auth_cache_status: Option<CacheStatus>,
}

impl AccessRecord {
    pub fn emit(&self) {
        info!(
            target: ACCESS_TARGET,
            time = %self.time.to_rfc3339_opts(SecondsFormat::Millis, true),
            remote_addr = %display_or_dash(self.remote_addr.map(|addr| addr.ip())),
            method = %self.method,
            path = %self.path,
            status = self.status.as_u16(),
            bytes_sent = self.bytes_sent,
            user_agent = %self.user_agent.as_deref().unwrap_or("-"),
            gzip_ratio = %display_or_dash(self.gzip_ratio.map(|ratio| format!("{ratio:.2}"))),
            request_time = %format_seconds(self.request_time),
            upstream_connect_time = %seconds_or_dash(self.upstream.connect),
            upstream_header_time = %seconds_or_dash(self.upstream.header),
            upstream_response_time = %seconds_or_dash(self.upstream.response),
            cache_status = %display_or_dash(self.cache_status),
            auth_cache_status = %display_or_dash(self.auth_cache_status),
            "request"
        );
    }
}

fn seconds_or_dash(duration: Option<Duration>) -> String {
    duration.map_or_else(|| "-".to_owned(), format_seconds)
}

fn display_or_dash<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_owned(), |value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_values_render_as_dash() {
        assert_eq!(seconds_or_dash(None), "-");
        assert_eq!(seconds_or_dash(Some(Duration::from_millis(1500))), "1.500");
        assert_eq!(display_or_dash(Some(CacheStatus::Stale)), "STALE");
        assert_eq!(display_or_dash::<CacheStatus>(None), "-");
    }
}
