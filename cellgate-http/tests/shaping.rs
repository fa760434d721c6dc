//! A cached response shaped for two different callers.

use bytes::Bytes;
use cellgate_core::CacheStatus;
use cellgate_http::headers::{X_CACHE_STATUS, X_TOTAL_TIME};
use cellgate_http::{CachedResponse, CorsPolicy, Diagnostics, GzipNegotiator};
use http::header::{
    ACCEPT_ENCODING, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE,
    HeaderValue, ORIGIN,
};
use http::{HeaderMap, StatusCode};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn stored() -> CachedResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("https://bbp.epfl.ch"),
    );
    CachedResponse::new(
        StatusCode::OK,
        headers,
        Bytes::from("{\"nodes\":[1,2,3]}".repeat(64)),
    )
}

fn shape(stored: &CachedResponse, request: &HeaderMap) -> (HeaderMap, Bytes) {
    let cors = CorsPolicy::default();
    let gzip = GzipNegotiator::default();

    let (_, mut headers, body) = stored.clone().into_parts();
    cors.apply(cors.allowed_origin(request).as_ref(), &mut headers);
    let (body, _) = gzip.encode(request, &mut headers, body);
    Diagnostics {
        cache: CacheStatus::Hit,
        auth_cache: Some(CacheStatus::Hit),
        total_time: Duration::from_millis(2),
    }
    .apply(&mut headers);
    (headers, body)
}

#[test]
fn cross_origin_headers_follow_the_caller_not_the_entry() {
    let entry = stored();
    assert!(!entry.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));

    let mut localhost = HeaderMap::new();
    localhost.insert(ORIGIN, HeaderValue::from_static("http://localhost:3000"));
    let (headers, _) = shape(&entry, &localhost);
    assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");

    let mut stranger = HeaderMap::new();
    stranger.insert(ORIGIN, HeaderValue::from_static("https://example.com"));
    let (headers, _) = shape(&entry, &stranger);
    assert!(!headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));
    assert_eq!(headers[X_CACHE_STATUS], "HIT");
    assert_eq!(headers[X_TOTAL_TIME], "0.002");
    assert_eq!(headers[CACHE_CONTROL], "private");
}

#[test]
fn compression_never_touches_the_stored_bytes() {
    let entry = stored();
    let mut request = HeaderMap::new();
    request.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

    let (headers, body) = shape(&entry, &request);

    assert_eq!(headers[CONTENT_ENCODING], "gzip");
    assert!(body.len() < entry.body().len());
    assert!(!entry.headers().contains_key(CONTENT_ENCODING));
    assert!(entry.body().starts_with(b"{\"nodes\""));
}
