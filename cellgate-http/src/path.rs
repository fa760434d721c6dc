//! Mount-prefix removal.

use std::borrow::Cow;

/// Strips the `/api/<service>` prefix the gateway is mounted under.
///
/// The prefix is removed at most once, before the path is used for anything
/// else, so it never reaches a cache key or the upstream.
///
/// ```
/// use cellgate_http::PathNormalizer;
///
/// let paths = PathNormalizer::new("sonata");
/// assert_eq!(paths.normalize("/api/sonata/circuit/info"), "/circuit/info");
/// assert_eq!(paths.normalize("/api/sonata"), "/");
/// assert_eq!(paths.normalize("/circuit/info"), "/circuit/info");
/// ```
#[derive(Debug, Clone, Default)]
pub struct PathNormalizer {
    prefix: Option<String>,
}

impl PathNormalizer {
    /// Strips `/api/<service>`.
    pub fn new(service: &str) -> Self {
        let service = service.trim_matches('/');
        if service.is_empty() {
            return Self::disabled();
        }
        Self {
            prefix: Some(format!("/api/{service}")),
        }
    }

    /// Leaves every path unchanged.
    pub fn disabled() -> Self {
        Self { prefix: None }
    }

    /// The stripped prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Returns `path` without the mount prefix.
    pub fn normalize<'a>(&self, path: &'a str) -> Cow<'a, str> {
        let Some(prefix) = self.prefix.as_deref() else {
            return Cow::Borrowed(path);
        };
        match path.strip_prefix(prefix) {
            Some("") => Cow::Borrowed("/"),
            Some(rest) if rest.starts_with('/') => Cow::Borrowed(rest),
            _ => Cow::Borrowed(path),
        }
    }
}
