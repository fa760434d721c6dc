//! Credential normalization.
//!
//! Clients present a bearer credential either in `Authorization` or, for
//! older clients, in a custom token header carrying the bare token. The
//! adapter folds both into one canonical `Authorization` value. Only that
//! value travels upstream and only its hash is ever used as a cache key.

use cellgate_core::CredentialHash;
use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};

/// Default name of the legacy token header.
pub const DEFAULT_LEGACY_HEADER: HeaderName = HeaderName::from_static("nexus-token");

const BEARER: &str = "bearer ";

/// The canonical credential of a request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(HeaderValue);

impl Credential {
    /// The value forwarded in `Authorization`.
    pub fn header_value(&self) -> &HeaderValue {
        &self.0
    }

    /// SHA-512 of the canonical value, used as the auth cache key.
    pub fn hash(&self) -> CredentialHash {
        CredentialHash::of(self.0.as_bytes())
    }
}

// Credentials are secrets: only the hash prefix is ever printed.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credential").field(&self.hash()).finish()
    }
}

/// Folds the primary and legacy credential headers into one.
#[derive(Debug, Clone)]
pub struct CredentialAdapter {
    legacy_header: HeaderName,
}

impl Default for CredentialAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_LEGACY_HEADER)
    }
}

impl CredentialAdapter {
    /// Creates an adapter for the given legacy header name.
    pub fn new(legacy_header: HeaderName) -> Self {
        Self { legacy_header }
    }

    /// Name of the legacy token header.
    pub fn legacy_header(&self) -> &HeaderName {
        &self.legacy_header
    }

    /// Normalizes `headers` in place and returns the canonical credential.
    ///
    /// Afterwards the legacy header is gone and `Authorization` holds at most
    /// one value: the returned credential. Blank values count as absent.
    pub fn normalize(&self, headers: &mut HeaderMap) -> Option<Credential> {
        let legacy = headers.remove(&self.legacy_header);

        let primary = headers.remove(AUTHORIZATION).filter(|value| !is_blank(value));
        let canonical = match primary {
            Some(value) => value,
            None => legacy.filter(|value| !is_blank(value)).and_then(bearer)?,
        };

        headers.insert(AUTHORIZATION, canonical.clone());
        Some(Credential(canonical))
    }
}

fn is_blank(value: &HeaderValue) -> bool {
    value.as_bytes().iter().all(u8::is_ascii_whitespace)
}

/// Turns a bare legacy token into `Bearer <token>`.
fn bearer(token: HeaderValue) -> Option<HeaderValue> {
    let token = token.to_str().ok()?.trim();
    let prefixed = token
        .get(..BEARER.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(BEARER));
    if prefixed {
        HeaderValue::from_str(token).ok()
    } else {
        HeaderValue::from_str(&format!("Bearer {token}")).ok()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn adapter() -> CredentialAdapter {
        CredentialAdapter::default()
    }

    #[test]
    fn primary_header_is_used_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer primary"));
        headers.insert("nexus-token", HeaderValue::from_static("legacy"));

        let credential = adapter().normalize(&mut headers).unwrap();

        assert_eq!(credential.header_value(), "Bearer primary");
        assert_eq!(headers[AUTHORIZATION], "Bearer primary");
        assert!(!headers.contains_key("nexus-token"));
    }

    #[test]
    fn legacy_token_is_bridged() {
        let mut headers = HeaderMap::new();
        headers.insert("Nexus-Token", HeaderValue::from_static("abc123"));

        let credential = adapter().normalize(&mut headers).unwrap();

        assert_eq!(credential.header_value(), "Bearer abc123");
        assert_eq!(headers[AUTHORIZATION], "Bearer abc123");
        assert!(!headers.contains_key("nexus-token"));
    }

    #[test]
    fn both_conventions_share_the_hash() {
        let mut primary = HeaderMap::new();
        primary.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        let mut legacy = HeaderMap::new();
        legacy.insert("nexus-token", HeaderValue::from_static("abc123"));

        assert_eq!(
            adapter().normalize(&mut primary).unwrap().hash(),
            adapter().normalize(&mut legacy).unwrap().hash()
        );
    }

    #[test]
    fn prefixed_legacy_token_is_not_prefixed_twice() {
        let mut headers = HeaderMap::new();
        headers.insert("nexus-token", HeaderValue::from_static("Bearer abc"));
        let credential = adapter().normalize(&mut headers).unwrap();
        assert_eq!(credential.header_value(), "Bearer abc");
    }

    #[test]
    fn missing_or_blank_credentials_are_absent() {
        let mut headers = HeaderMap::new();
        assert!(adapter().normalize(&mut headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("  "));
        headers.insert("nexus-token", HeaderValue::from_static(""));
        assert!(adapter().normalize(&mut headers).is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn custom_legacy_header() {
        let adapter = CredentialAdapter::new(HeaderName::from_static("x-token"));
        let mut headers = HeaderMap::new();
        headers.insert("x-token", HeaderValue::from_static("t"));
        headers.insert("nexus-token", HeaderValue::from_static("ignored"));

        let credential = adapter.normalize(&mut headers).unwrap();

        assert_eq!(credential.header_value(), "Bearer t");
        assert!(headers.contains_key("nexus-token"));
    }

    #[test]
    fn debug_does_not_leak_the_token() {
        let credential = Credential(HeaderValue::from_static("Bearer very-secret"));
        assert!(!format!("{credential:?}").contains("very-secret"));
    }
}
