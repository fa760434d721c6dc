//! Cross-origin header reconstruction.
//!
//! Stored responses never carry `Access-Control-*` headers, so the resolver
//! rebuilds them for every response from the requesting origin alone.

use std::time::Duration;

use http::HeaderMap;
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    CONTENT_LENGTH, HeaderValue, ORIGIN,
};

use crate::headers::{append_vary, strip_access_control};

/// Origins allowed when none are configured.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 3] = [
    "http://localhost:3000",
    "https://bbp.epfl.ch",
    "https://sonata.sbo.kcp.bbp.epfl.ch",
];

/// Exact-match CORS policy.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: Vec<HeaderValue>,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    expose_headers: HeaderValue,
    max_age: Duration,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALLOWED_ORIGINS
                .into_iter()
                .map(HeaderValue::from_static),
        )
    }
}

impl CorsPolicy {
    /// Creates a policy for `origins` with default preflight settings.
    pub fn new(origins: impl IntoIterator<Item = HeaderValue>) -> Self {
        Self {
            allowed_origins: origins.into_iter().collect(),
            allow_methods: HeaderValue::from_static("GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS"),
            allow_headers: HeaderValue::from_static(
                "Authorization, Content-Type, Accept, Accept-Encoding, Nexus-Token",
            ),
            expose_headers: HeaderValue::from_static(
                "X-Cache-Status, X-Auth-Cache-Status, X-Total-Time",
            ),
            max_age: Duration::from_secs(3600),
        }
    }

    /// Sets `Access-Control-Allow-Methods` for preflight responses.
    pub fn allow_methods(mut self, methods: HeaderValue) -> Self {
        self.allow_methods = methods;
        self
    }

    /// Sets `Access-Control-Allow-Headers` for preflight responses.
    pub fn allow_headers(mut self, headers: HeaderValue) -> Self {
        self.allow_headers = headers;
        self
    }

    /// Sets `Access-Control-Expose-Headers` for actual responses.
    pub fn expose_headers(mut self, headers: HeaderValue) -> Self {
        self.expose_headers = headers;
        self
    }

    /// Sets how long browsers may cache a preflight answer.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Returns the request's `Origin` if it is allow-listed.
    pub fn allowed_origin(&self, request_headers: &HeaderMap) -> Option<HeaderValue> {
        let origin = request_headers.get(ORIGIN)?;
        self.allowed_origins
            .iter()
            .any(|allowed| allowed.as_bytes() == origin.as_bytes())
            .then(|| origin.clone())
    }

    /// Rebuilds the cross-origin headers of an actual (non-preflight) response.
    ///
    /// Whatever `Access-Control-*` headers are present are removed first;
    /// with no allowed origin the response leaves without any.
    pub fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        strip_access_control(headers);
        let Some(origin) = origin else {
            return;
        };
        self.allow(origin, headers);
        headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, self.expose_headers.clone());
        append_vary(headers, "Origin");
    }

    /// Headers of the terminal 204 answer to a preflight request.
    pub fn preflight(&self, origin: Option<&HeaderValue>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        let Some(origin) = origin else {
            return headers;
        };
        self.allow(origin, &mut headers);
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        headers.insert(
            ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from(self.max_age.as_secs()),
        );
        append_vary(&mut headers, "Origin");
        headers
    }

    fn allow(&self, origin: &HeaderValue, headers: &mut HeaderMap) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn request_from(origin: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static(origin));
        headers
    }

    #[test]
    fn only_exact_origins_match() {
        let policy = CorsPolicy::default();
        assert!(policy.allowed_origin(&request_from("https://bbp.epfl.ch")).is_some());
        assert!(policy.allowed_origin(&request_from("https://bbp.epfl.ch/")).is_none());
        assert!(policy.allowed_origin(&request_from("https://evil.bbp.epfl.ch")).is_none());
        assert!(policy.allowed_origin(&HeaderMap::new()).is_none());
    }

    #[test]
    fn allowed_origin_is_echoed() {
        let policy = CorsPolicy::default();
        let origin = policy.allowed_origin(&request_from("http://localhost:3000"));
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

        policy.apply(origin.as_ref(), &mut headers);

        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers["vary"], "Origin");
        assert!(headers.contains_key(ACCESS_CONTROL_EXPOSE_HEADERS));
    }

    #[test]
    fn unknown_origin_gets_no_cors_headers() {
        let policy = CorsPolicy::default();
        let origin = policy.allowed_origin(&request_from("https://example.com"));
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

        policy.apply(origin.as_ref(), &mut headers);

        assert!(headers.is_empty());
    }

    #[test]
    fn preflight_advertises_methods_headers_and_max_age() {
        let policy = CorsPolicy::default();
        let origin = policy.allowed_origin(&request_from("https://bbp.epfl.ch"));

        let headers = policy.preflight(origin.as_ref());

        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "https://bbp.epfl.ch");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "3600");
        assert!(headers.contains_key(ACCESS_CONTROL_ALLOW_METHODS));
        assert!(headers.contains_key(ACCESS_CONTROL_ALLOW_HEADERS));
        assert_eq!(headers[CONTENT_LENGTH], "0");
    }

    #[test]
    fn preflight_from_unknown_origin_is_bare() {
        let headers = CorsPolicy::default().preflight(None);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[CONTENT_LENGTH], "0");
    }
}
