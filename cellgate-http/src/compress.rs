//! Per-response gzip negotiation.
//!
//! Compression is applied to the outgoing copy of a body only; stored entries
//! always hold the uncompressed bytes.

use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::HeaderMap;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue};
use tracing::warn;

use crate::headers::append_vary;
use crate::response::media_type;

/// Media types compressed by default, besides `text/*`, `*+json` and `*+xml`.
pub const DEFAULT_COMPRESSIBLE_TYPES: [&str; 6] = [
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-ndjson",
    "application/yaml",
    "image/svg+xml",
];

/// Already compressed columnar or opaque binary types. Never compressed, even
/// when listed as compressible.
pub const INCOMPRESSIBLE_TYPES: [&str; 4] = [
    "application/vnd.apache.arrow.file",
    "application/vnd.apache.arrow.stream",
    "application/vnd.apache.parquet",
    "application/octet-stream",
];

/// Decides whether, and compresses when, a response goes out gzipped.
#[derive(Debug, Clone)]
pub struct GzipNegotiator {
    types: Vec<String>,
    min_length: usize,
    level: Compression,
}

impl Default for GzipNegotiator {
    fn default() -> Self {
        Self {
            types: DEFAULT_COMPRESSIBLE_TYPES
                .iter()
                .map(|media| (*media).to_owned())
                .collect(),
            min_length: 256,
            level: Compression::default(),
        }
    }
}

impl GzipNegotiator {
    /// Replaces the list of compressible media types.
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.types = types
            .into_iter()
            .map(|media| media.as_ref().trim().to_ascii_lowercase())
            .collect();
        self
    }

    /// Bodies shorter than this are sent as-is.
    pub fn min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// gzip level, 0 to 9.
    pub fn level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }

    /// Whether the client accepts gzip.
    ///
    /// An explicit `gzip;q=0` refuses it even when `*` is accepted.
    pub fn accepts_gzip(request_headers: &HeaderMap) -> bool {
        let mut wildcard = false;
        for value in request_headers.get_all(ACCEPT_ENCODING) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for item in value.split(',') {
                let mut params = item.split(';');
                let coding = params.next().unwrap_or_default().trim();
                let accepted = params
                    .filter_map(|param| param.trim().strip_prefix("q="))
                    .all(|q| q.trim().parse::<f32>().is_ok_and(|q| q > 0.0));
                if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
                    return accepted;
                }
                if coding == "*" {
                    wildcard = accepted;
                }
            }
        }
        wildcard
    }

    /// Whether a response with these headers and body length is compressible.
    pub fn is_compressible(&self, response_headers: &HeaderMap, body_len: usize) -> bool {
        if body_len < self.min_length || response_headers.contains_key(CONTENT_ENCODING) {
            return false;
        }
        let Some(media) = media_type(response_headers) else {
            return false;
        };
        if INCOMPRESSIBLE_TYPES.contains(&media.as_str()) {
            return false;
        }
        media.starts_with("text/")
            || media.ends_with("+json")
            || media.ends_with("+xml")
            || self.types.iter().any(|listed| *listed == media)
    }

    /// Compresses `body` when the client accepts gzip and the response
    /// qualifies, updating `response_headers` accordingly.
    ///
    /// Returns the body to send and the compression ratio
    /// (original size / compressed size) if it was compressed.
    pub fn encode(
        &self,
        request_headers: &HeaderMap,
        response_headers: &mut HeaderMap,
        body: Bytes,
    ) -> (Bytes, Option<f64>) {
        if !self.is_compressible(response_headers, body.len()) {
            return (body, None);
        }
        // The representation depends on Accept-Encoding either way.
        append_vary(response_headers, "Accept-Encoding");
        if !Self::accepts_gzip(request_headers) {
            return (body, None);
        }

        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), self.level);
        let compressed = match encoder.write_all(&body).and_then(|()| encoder.finish()) {
            Ok(compressed) => compressed,
            Err(error) => {
                warn!(%error, "gzip failed, sending uncompressed body");
                return (body, None);
            }
        };

        let ratio = body.len() as f64 / compressed.len().max(1) as f64;
        response_headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        response_headers.remove(CONTENT_LENGTH);
        (Bytes::from(compressed), Some(ratio))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;
    use http::header::{CONTENT_TYPE, VARY};
    use pretty_assertions::assert_eq;

    use super::*;

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(value));
        headers
    }

    fn typed(media: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(media));
        headers
    }

    #[test]
    fn accept_encoding_parsing() {
        assert!(GzipNegotiator::accepts_gzip(&accept("gzip, deflate, br")));
        assert!(GzipNegotiator::accepts_gzip(&accept("br;q=1.0, gzip;q=0.5")));
        assert!(GzipNegotiator::accepts_gzip(&accept("*")));
        assert!(!GzipNegotiator::accepts_gzip(&accept("gzip;q=0")));
        assert!(!GzipNegotiator::accepts_gzip(&accept("*, gzip;q=0")));
        assert!(!GzipNegotiator::accepts_gzip(&accept("identity")));
        assert!(!GzipNegotiator::accepts_gzip(&HeaderMap::new()));
    }

    #[test]
    fn compressible_types() {
        let negotiator = GzipNegotiator::default();
        assert!(negotiator.is_compressible(&typed("application/json; charset=utf-8"), 1024));
        assert!(negotiator.is_compressible(&typed("text/html"), 1024));
        assert!(negotiator.is_compressible(&typed("application/problem+json"), 1024));
        assert!(!negotiator.is_compressible(&typed("application/vnd.apache.arrow.file"), 1024));
        assert!(!negotiator.is_compressible(&typed("application/vnd.apache.parquet"), 1024));
        assert!(!negotiator.is_compressible(&typed("application/octet-stream"), 1024));
        assert!(!negotiator.is_compressible(&typed("application/json"), 10));
        assert!(!negotiator.is_compressible(&HeaderMap::new(), 1024));
    }

    #[test]
    fn listing_arrow_does_not_make_it_compressible() {
        let negotiator = GzipNegotiator::default().types(["application/vnd.apache.arrow.file"]);
        assert!(!negotiator.is_compressible(&typed("application/vnd.apache.arrow.file"), 1024));
    }

    #[test]
    fn encodes_json_and_reports_ratio() {
        let negotiator = GzipNegotiator::default();
        let body = Bytes::from("{\"value\":1}".repeat(200));
        let mut headers = typed("application/json");
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

        let (sent, ratio) = negotiator.encode(&accept("gzip"), &mut headers, body.clone());

        assert_eq!(headers[CONTENT_ENCODING], "gzip");
        assert_eq!(headers[VARY], "Accept-Encoding");
        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert!(ratio.unwrap() > 1.0);

        let mut decoded = Vec::new();
        GzDecoder::new(&sent[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, body.to_vec());
    }

    #[test]
    fn already_encoded_body_is_left_alone() {
        let negotiator = GzipNegotiator::default();
        let body = Bytes::from(vec![b'a'; 4096]);
        let mut headers = typed("text/plain");
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("br"));

        let (sent, ratio) = negotiator.encode(&accept("gzip"), &mut headers, body.clone());

        assert_eq!(sent, body);
        assert_eq!(ratio, None);
    }

    #[test]
    fn client_without_gzip_still_gets_vary() {
        let negotiator = GzipNegotiator::default();
        let body = Bytes::from(vec![b'a'; 4096]);
        let mut headers = typed("text/plain");

        let (sent, ratio) = negotiator.encode(&HeaderMap::new(), &mut headers, body.clone());

        assert_eq!(sent, body);
        assert_eq!(ratio, None);
        assert_eq!(headers[VARY], "Accept-Encoding");
        assert!(!headers.contains_key(CONTENT_ENCODING));
    }
}
