//! The response type stored in the cache.

use std::time::Duration;

use bytes::Bytes;
use cellgate_core::CacheableResponse;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use crate::headers::{strip_access_control, strip_hop_by_hop};

/// Timings of the upstream exchange that produced a response.
///
/// `None` means the phase did not happen for this request (for example the
/// response was served from cache).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpstreamTimings {
    /// Time to establish the connection. Zero when a pooled connection was reused.
    pub connect: Option<Duration>,
    /// Time until the response head was received.
    pub header: Option<Duration>,
    /// Time until the whole body was received.
    pub response: Option<Duration>,
}

/// Buffered upstream response, as stored in the cache and sent to clients.
///
/// Connection-scoped and `Access-Control-*` headers are dropped when the
/// response is captured, so cached bytes never carry another caller's
/// cross-origin context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    #[serde(with = "http_serde::status_code")]
    status: StatusCode,
    #[serde(with = "header_pairs")]
    headers: HeaderMap,
    body: Bytes,
    #[serde(skip)]
    timings: UpstreamTimings,
}

impl CachedResponse {
    /// Captures an upstream response.
    pub fn new(status: StatusCode, mut headers: HeaderMap, body: Bytes) -> Self {
        strip_hop_by_hop(&mut headers);
        strip_access_control(&mut headers);
        Self {
            status,
            headers,
            body,
            timings: UpstreamTimings::default(),
        }
    }

    /// Builds a gateway-generated `{"message": ...}` response.
    pub fn json_message(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "message": message }).to_string();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::new(status, headers, Bytes::from(body))
    }

    /// Attaches the timings of the exchange that produced this response.
    pub fn with_timings(mut self, timings: UpstreamTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Status code.
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Headers, in upstream order.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Uncompressed body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Upstream timings; all `None` for a response read from the cache.
    pub fn timings(&self) -> UpstreamTimings {
        self.timings
    }

    /// Media type without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        media_type(&self.headers)
    }

    /// Splits the response into status, headers and body.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

impl CacheableResponse for CachedResponse {
    fn status(&self) -> u16 {
        self.status.as_u16()
    }

    fn is_storable(&self) -> bool {
        !self
            .headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
    }

    fn into_shared(self) -> Self {
        Self {
            timings: UpstreamTimings::default(),
            ..self
        }
    }
}

/// Media type of `Content-Type` without parameters, lowercased.
pub(crate) fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let media = value.split(';').next()?.trim();
    if media.is_empty() {
        None
    } else {
        Some(media.to_ascii_lowercase())
    }
}

/// Serializes a [`HeaderMap`] as an ordered list of `(name, value)` pairs.
///
/// Repeated names stay as separate pairs, so multi-valued headers keep their
/// values and order. The length is always written up front: bincode cannot
/// encode a sequence of unknown length.
mod header_pairs {
    use http::header::{HeaderName, HeaderValue};
    use http::HeaderMap;
    use serde::de::Error as _;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_bytes::ByteBuf;

    pub fn serialize<S>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // `HeaderMap::len` counts values, not names.
        let mut seq = serializer.serialize_seq(Some(headers.len()))?;
        for (name, value) in headers {
            seq.serialize_element(&(name.as_str(), serde_bytes::Bytes::new(value.as_bytes())))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HeaderMap, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(String, ByteBuf)>::deserialize(deserializer)?;
        let mut headers = HeaderMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(D::Error::custom)?;
            let value = HeaderValue::from_bytes(&value).map_err(D::Error::custom)?;
            headers.append(name, value);
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use http::header::{CONNECTION, SET_COOKIE};
    use pretty_assertions::assert_eq;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn capture_drops_connection_and_cors_headers() {
        let response = CachedResponse::new(
            StatusCode::OK,
            headers(&[
                ("connection", "close"),
                ("access-control-allow-origin", "https://evil.example"),
                ("content-type", "application/json"),
            ]),
            Bytes::from_static(b"{}"),
        );

        assert!(!response.headers().contains_key(CONNECTION));
        assert!(!response.headers().contains_key("access-control-allow-origin"));
        assert_eq!(response.content_type().as_deref(), Some("application/json"));
    }

    #[test]
    fn no_store_is_not_storable() {
        let storable = CachedResponse::new(
            StatusCode::OK,
            headers(&[("cache-control", "max-age=60")]),
            Bytes::new(),
        );
        let forbidden = CachedResponse::new(
            StatusCode::OK,
            headers(&[("cache-control", "private, No-Store")]),
            Bytes::new(),
        );
        assert!(storable.is_storable());
        assert!(!forbidden.is_storable());
    }

    #[test]
    fn shared_copy_drops_upstream_timings() {
        let response = CachedResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{}"))
            .with_timings(UpstreamTimings {
                connect: Some(Duration::from_millis(3)),
                header: Some(Duration::from_millis(9)),
                response: Some(Duration::from_millis(12)),
            });

        let shared = response.clone().into_shared();

        assert_eq!(shared.timings(), UpstreamTimings::default());
        assert_eq!(shared.status_code(), response.status_code());
        assert_eq!(shared.body(), response.body());
    }

    #[test]
    fn multi_valued_headers_survive_encoding() {
        let response = CachedResponse::new(
            StatusCode::NOT_FOUND,
            headers(&[
                ("set-cookie", "a=1"),
                ("content-type", "text/plain; charset=utf-8"),
                ("set-cookie", "b=2"),
            ]),
            Bytes::from_static(b"missing"),
        )
        .with_timings(UpstreamTimings {
            connect: Some(Duration::from_millis(3)),
            ..Default::default()
        });

        let config = bincode::config::standard();
        let encoded = bincode::serde::encode_to_vec(&response, config).unwrap();
        let (decoded, _): (CachedResponse, _) =
            bincode::serde::decode_from_slice(&encoded, config).unwrap();

        assert_eq!(decoded.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(decoded.body(), &Bytes::from_static(b"missing"));
        let cookies: Vec<&str> = decoded
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(decoded.timings(), UpstreamTimings::default());
    }

    #[test]
    fn headerless_response_survives_encoding() {
        let response = CachedResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{}"));

        let config = bincode::config::standard();
        let encoded = bincode::serde::encode_to_vec(&response, config).unwrap();
        let (decoded, _): (CachedResponse, _) =
            bincode::serde::decode_from_slice(&encoded, config).unwrap();

        assert_eq!(decoded.status_code(), StatusCode::OK);
        assert!(decoded.headers().is_empty());
        assert_eq!(decoded.body(), &Bytes::from_static(b"{}"));
    }

    #[test]
    fn json_message_escapes_text() {
        let response = CachedResponse::json_message(StatusCode::BAD_GATEWAY, "upstream \"down\"");
        assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.body(),
            &Bytes::from_static(br#"{"message":"upstream \"down\""}"#)
        );
    }
}
