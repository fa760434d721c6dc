//! Cache key types.
//!
//! The gateway caches two kinds of things and each has its own key:
//!
//! - [`CacheKey::Auth`] - an allow/deny decision, keyed by the [`CredentialHash`]
//!   of the caller's canonical credential
//! - [`CacheKey::Resource`] - a proxied response, keyed by [`ResourceKey`]
//!
//! The raw credential never becomes part of a key. Only its SHA-512 digest is
//! kept, and there is no way to build a [`CredentialHash`] for an absent
//! credential: callers must reject such requests before any cache lookup.
//!
//! ```
//! use cellgate_core::{CacheKey, CredentialHash, ResourceKey};
//!
//! let auth = CacheKey::Auth(CredentialHash::of("Bearer abc"));
//! assert!(auth.to_string().starts_with("auth:"));
//!
//! let resource = CacheKey::Resource(ResourceKey::new("HTTP", "Example.org", "/circuit", "x=1"));
//! assert_eq!(resource.to_string(), "resource:http://example.org/circuit?x=1");
//! ```

use std::fmt;
use std::mem::size_of;

use sha2::{Digest, Sha512};
use smol_str::SmolStr;

/// Length in bytes of a [`CredentialHash`].
pub const CREDENTIAL_HASH_LEN: usize = 64;

/// SHA-512 digest of a canonical credential string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialHash([u8; CREDENTIAL_HASH_LEN]);

impl CredentialHash {
    /// Hashes the canonical credential (for example `Bearer <token>`).
    pub fn of(canonical: impl AsRef<[u8]>) -> Self {
        let digest = Sha512::digest(canonical.as_ref());
        let mut bytes = [0u8; CREDENTIAL_HASH_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Returns the digest bytes.
    pub fn as_bytes(&self) -> &[u8; CREDENTIAL_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// Only a prefix is printed so debug output never carries the full digest.
impl fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialHash({}..)", hex::encode(&self.0[..6]))
    }
}

/// Canonical identity of a proxied, non-auth request.
///
/// Scheme and host are lowercased. The path must already be normalized
/// (mount prefix removed). The query string is kept verbatim, so two requests
/// only share an entry when their queries are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    scheme: SmolStr,
    host: SmolStr,
    path: SmolStr,
    query: SmolStr,
}

impl ResourceKey {
    /// Builds a key from request components.
    pub fn new(
        scheme: impl AsRef<str>,
        host: impl AsRef<str>,
        path: impl Into<SmolStr>,
        query: impl Into<SmolStr>,
    ) -> Self {
        Self {
            scheme: SmolStr::new(scheme.as_ref().to_ascii_lowercase()),
            host: SmolStr::new(host.as_ref().to_ascii_lowercase()),
            path: path.into(),
            query: query.into(),
        }
    }

    /// Request scheme, lowercased.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Request host, lowercased, including the port when one was given.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Normalized request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string without the leading `?`. Empty when absent.
    pub fn query(&self) -> &str {
        &self.query
    }

    fn heap_size(&self) -> usize {
        [&self.scheme, &self.host, &self.path, &self.query]
            .iter()
            .filter(|s| s.is_heap_allocated())
            .map(|s| s.len())
            .sum()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        Ok(())
    }
}

/// Key of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Cached authorization decision.
    Auth(CredentialHash),
    /// Cached resource response.
    Resource(ResourceKey),
}

impl CacheKey {
    /// Returns the estimated memory usage of this key in bytes.
    ///
    /// Used by byte-weighted backends to account for key storage.
    pub fn memory_size(&self) -> usize {
        let heap = match self {
            CacheKey::Auth(_) => 0,
            CacheKey::Resource(key) => key.heap_size(),
        };
        size_of::<Self>() + heap
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Auth(hash) => write!(f, "auth:{hash}"),
            CacheKey::Resource(key) => write!(f, "resource:{key}"),
        }
    }
}

impl From<CredentialHash> for CacheKey {
    fn from(hash: CredentialHash) -> Self {
        CacheKey::Auth(hash)
    }
}

impl From<ResourceKey> for CacheKey {
    fn from(key: ResourceKey) -> Self {
        CacheKey::Resource(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_hash_is_stable_and_distinct() {
        let a = CredentialHash::of("Bearer token-a");
        assert_eq!(a, CredentialHash::of("Bearer token-a"));
        assert_ne!(a, CredentialHash::of("Bearer token-b"));
        assert_eq!(a.to_string().len(), CREDENTIAL_HASH_LEN * 2);
    }

    #[test]
    fn debug_output_does_not_leak_full_digest() {
        let hash = CredentialHash::of("Bearer secret");
        let debug = format!("{hash:?}");
        assert!(!debug.contains(&hash.to_string()));
    }

    #[test]
    fn resource_key_ignores_scheme_and_host_case() {
        let a = ResourceKey::new("HTTPS", "API.Example.org", "/circuit", "id=1");
        let b = ResourceKey::new("https", "api.example.org", "/circuit", "id=1");
        assert_eq!(a, b);
    }

    #[test]
    fn resource_key_keeps_path_and_query_verbatim() {
        let a = ResourceKey::new("http", "h", "/Circuit", "a=1&b=2");
        let b = ResourceKey::new("http", "h", "/circuit", "a=1&b=2");
        let c = ResourceKey::new("http", "h", "/Circuit", "b=2&a=1");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn memory_size_accounts_for_long_paths() {
        let short = CacheKey::Resource(ResourceKey::new("http", "h", "/a", ""));
        let long = CacheKey::Resource(ResourceKey::new("http", "h", "/a".repeat(64), ""));
        assert!(long.memory_size() > short.memory_size());
    }
}
