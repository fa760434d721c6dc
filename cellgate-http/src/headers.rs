//! Header helpers shared by response capture and response shaping.

use std::time::Duration;

use cellgate_core::CacheStatus;
use http::header::{
    CACHE_CONTROL, CONNECTION, HeaderName, HeaderValue, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION,
    TE, TRAILER, TRANSFER_ENCODING, UPGRADE, VARY,
};
use http::HeaderMap;

/// Cache outcome of the resource lookup.
pub const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");

/// Cache outcome of the authorization lookup.
pub const X_AUTH_CACHE_STATUS: HeaderName = HeaderName::from_static("x-auth-cache-status");

/// Total time spent in the gateway, in seconds with millisecond precision.
pub const X_TOTAL_TIME: HeaderName = HeaderName::from_static("x-total-time");

/// Headers meaningful only for a single transport-level connection.
pub const HOP_BY_HOP: [HeaderName; 8] = [
    CONNECTION,
    HeaderName::from_static("keep-alive"),
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

const ACCESS_CONTROL_PREFIX: &str = "access-control-";

/// Removes hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Removes every `Access-Control-*` header.
pub fn strip_access_control(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(ACCESS_CONTROL_PREFIX))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
}

/// Adds `token` to `Vary` unless it is already listed.
pub fn append_vary(headers: &mut HeaderMap, token: &'static str) {
    let present = headers
        .get_all(VARY)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|listed| {
            let listed = listed.trim();
            listed == "*" || listed.eq_ignore_ascii_case(token)
        });
    if !present {
        headers.append(VARY, HeaderValue::from_static(token));
    }
}

/// Appends the `private` directive to `Cache-Control`.
///
/// The gateway's own caching is invisible to the client, so intermediaries
/// between the two must not share what it sends.
pub fn mark_private(headers: &mut HeaderMap) {
    let directives: Vec<&str> = headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .collect();

    if directives
        .iter()
        .any(|directive| directive.eq_ignore_ascii_case("private"))
    {
        return;
    }

    let value = if directives.is_empty() {
        HeaderValue::from_static("private")
    } else {
        match HeaderValue::from_str(&format!("{}, private", directives.join(", "))) {
            Ok(value) => value,
            Err(_) => HeaderValue::from_static("private"),
        }
    };
    headers.insert(CACHE_CONTROL, value);
}

/// Diagnostic headers attached to every non-preflight response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diagnostics {
    /// Resource lookup outcome.
    pub cache: CacheStatus,
    /// Authorization lookup outcome, absent for public and rejected requests.
    pub auth_cache: Option<CacheStatus>,
    /// Time spent handling the request so far.
    pub total_time: Duration,
}

impl Diagnostics {
    /// Writes the diagnostic headers and marks the response private.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_CACHE_STATUS, HeaderValue::from_static(self.cache.as_str()));
        match self.auth_cache {
            Some(status) => {
                headers.insert(X_AUTH_CACHE_STATUS, HeaderValue::from_static(status.as_str()));
            }
            None => {
                headers.remove(X_AUTH_CACHE_STATUS);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&format_seconds(self.total_time)) {
            headers.insert(X_TOTAL_TIME, value);
        }
        mark_private(headers);
    }
}

/// Formats a duration as seconds with millisecond precision (`0.042`).
pub fn format_seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}
