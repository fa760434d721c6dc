//! YAML configuration.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! gateway in front of `http://127.0.0.1:8000`.
//!
//! ```yaml
//! listen: 0.0.0.0:8080
//! upstream:
//!   url: http://127.0.0.1:8000
//!   connect_timeout: 5s
//!   timeout: 60s
//! auth:
//!   path: /auth
//!   legacy_header: Nexus-Token
//! cache:
//!   max_size: 1GiB
//!   public_ttl: 1m
//!   stale_while_revalidate: 1m
//!   stale_if_error: 24h
//! cors:
//!   allowed_origins: [http://localhost:3000]
//! server:
//!   mount_service: sonata
//!   max_body_size: 10MiB
//! log:
//!   level: info
//!   format: json
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use bytesize::ByteSize;
use cellgate::OffloadConfig;
use cellgate_core::TtlPolicy;
use cellgate_http::cors::DEFAULT_ALLOWED_ORIGINS;
use cellgate_http::compress::DEFAULT_COMPRESSIBLE_TYPES;
use cellgate_http::{CorsPolicy, CredentialAdapter, GzipNegotiator, PathNormalizer};
use http::Uri;
use http::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen: SocketAddr,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub cors: CorsConfig,
    pub compression: CompressionConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            upstream: UpstreamConfig::default(),
            auth: AuthConfig::default(),
            cache: CacheConfig::default(),
            cors: CorsConfig::default(),
            compression: CompressionConfig::default(),
            server: ServerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the resource API. Only scheme and authority are used.
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Deadline for the whole exchange, body included.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_owned(),
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Upstream authorization endpoint. Answers 404 when requested directly.
    pub path: String,
    pub legacy_header: String,
    /// Exact paths served without authorization.
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            path: "/auth".to_owned(),
            legacy_header: "Nexus-Token".to_owned(),
            public_paths: ["/version", "/health", "/docs", "/docs/oauth2-redirect", "/openapi.json"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Total size of stored entries.
    pub max_size: ByteSize,
    #[serde(with = "humantime_serde")]
    pub public_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub stale_while_revalidate: Duration,
    #[serde(with = "humantime_serde")]
    pub stale_if_error: Duration,
    /// Background refreshes running longer than this are cancelled.
    #[serde(with = "humantime_serde")]
    pub refresh_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let policy = TtlPolicy::default();
        Self {
            max_size: ByteSize::gib(1),
            public_ttl: policy.public_ttl,
            stale_while_revalidate: policy.stale_while_revalidate,
            stale_if_error: policy.stale_if_error,
            refresh_timeout: Duration::from_secs(120),
        }
    }
}

impl CacheConfig {
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            public_ttl: self.public_ttl,
            stale_while_revalidate: self.stale_while_revalidate,
            stale_if_error: self.stale_if_error,
        }
    }

    pub fn offload_config(&self) -> OffloadConfig {
        OffloadConfig::builder().timeout(self.refresh_timeout).build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_methods: String,
    pub allow_headers: String,
    pub expose_headers: String,
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|o| (*o).to_owned()).collect(),
            allow_methods: "GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS".to_owned(),
            allow_headers: "Authorization, Content-Type, Accept, Accept-Encoding, Nexus-Token"
                .to_owned(),
            expose_headers: "X-Cache-Status, X-Auth-Cache-Status, X-Total-Time".to_owned(),
            max_age: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub min_length: ByteSize,
    pub level: u32,
    pub types: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: ByteSize::b(256),
            level: 6,
            types: DEFAULT_COMPRESSIBLE_TYPES.iter().map(|t| (*t).to_owned()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Service name of the `/api/<service>` mount prefix. Unset disables stripping.
    pub mount_service: Option<String>,
    pub max_body_size: ByteSize,
    /// How long shutdown waits for background refreshes.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mount_service: None,
            max_body_size: ByteSize::mib(10),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Json,
        }
    }
}

impl Config {
    /// Reads and validates a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parses and validates YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_saphyr::from_str(text).map_err(|error| ConfigError::Parse(error.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that would otherwise fail at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream_uri()?;
        for (field, path) in [("auth.path", &self.auth.path)]
            .into_iter()
            .chain(self.auth.public_paths.iter().map(|p| ("auth.public_paths", p)))
        {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field,
                    value: path.clone(),
                });
            }
        }
        self.credential_adapter()?;
        self.cors_policy()?;
        if self.compression.level > 9 {
            return Err(ConfigError::InvalidValue {
                field: "compression.level",
                value: self.compression.level.to_string(),
            });
        }
        Ok(())
    }

    /// Scheme and authority of the upstream.
    pub fn upstream_uri(&self) -> Result<Uri, ConfigError> {
        let url = &self.upstream.url;
        let invalid = |reason: &str| ConfigError::UpstreamUrl {
            url: url.clone(),
            reason: reason.to_owned(),
        };
        let uri: Uri = url.parse().map_err(|_| invalid("not a valid URI"))?;
        if uri.scheme_str() != Some("http") {
            return Err(invalid("only absolute http:// URLs are supported"));
        }
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        Uri::builder()
            .scheme("http")
            .authority(authority.clone())
            .path_and_query("/")
            .build()
            .map_err(|_| invalid("not a valid URI"))
    }

    pub fn credential_adapter(&self) -> Result<CredentialAdapter, ConfigError> {
        let name = HeaderName::from_bytes(self.auth.legacy_header.as_bytes()).map_err(|_| {
            ConfigError::InvalidValue {
                field: "auth.legacy_header",
                value: self.auth.legacy_header.clone(),
            }
        })?;
        Ok(CredentialAdapter::new(name))
    }

    pub fn cors_policy(&self) -> Result<CorsPolicy, ConfigError> {
        let origins = self
            .cors
            .allowed_origins
            .iter()
            .map(|origin| header_value("cors.allowed_origins", origin))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CorsPolicy::new(origins)
            .allow_methods(header_value("cors.allow_methods", &self.cors.allow_methods)?)
            .allow_headers(header_value("cors.allow_headers", &self.cors.allow_headers)?)
            .expose_headers(header_value("cors.expose_headers", &self.cors.expose_headers)?)
            .max_age(self.cors.max_age))
    }

    /// `None` when compression is disabled.
    pub fn gzip(&self) -> Option<GzipNegotiator> {
        self.compression.enabled.then(|| {
            GzipNegotiator::default()
                .types(&self.compression.types)
                .min_length(usize::try_from(self.compression.min_length.as_u64()).unwrap_or(usize::MAX))
                .level(self.compression.level)
        })
    }

    pub fn path_normalizer(&self) -> PathNormalizer {
        match self.server.mount_service.as_deref() {
            Some(service) => PathNormalizer::new(service),
            None => PathNormalizer::disabled(),
        }
    }
}

fn header_value(field: &'static str, value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidValue {
        field,
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn stale_while_revalidate_is_on_by_default() {
        let policy = Config::default().cache.ttl_policy();
        assert_eq!(policy.stale_while_revalidate, Duration::from_secs(60));
    }

    #[test]
    fn durations_and_sizes_are_human_readable() {
        let yaml = r#"
listen: 127.0.0.1:9000
upstream:
  url: http://backend:8000
  timeout: 90s
cache:
  max_size: 256MiB
  public_ttl: 5m
  stale_while_revalidate: 30s
server:
  mount_service: sonata
  max_body_size: 1MiB
log:
  format: pretty
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.upstream.timeout, Duration::from_secs(90));
        assert_eq!(config.upstream.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.cache.max_size, ByteSize::mib(256));
        assert_eq!(config.cache.ttl_policy().public_ttl, Duration::from_secs(300));
        assert_eq!(
            config.cache.ttl_policy().stale_while_revalidate,
            Duration::from_secs(30)
        );
        assert_eq!(config.server.max_body_size, ByteSize::mib(1));
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.path_normalizer().prefix(), Some("/api/sonata"));
        assert_eq!(config.upstream_uri().unwrap(), "http://backend:8000/");
    }

    #[test]
    fn rejects_non_http_upstream() {
        let yaml = "upstream:\n  url: https://backend\n";
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::UpstreamUrl { .. })
        ));
        let yaml = "upstream:\n  url: /relative\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn rejects_invalid_origin() {
        let mut config = Config::default();
        config.cors.allowed_origins.push("https://bad\norigin".to_owned());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "cors.allowed_origins",
                ..
            })
        ));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            Config::from_yaml("cache:\n  ttl: 5m\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellgate.yaml");
        std::fs::write(&path, "auth:\n  legacy_header: X-Token\n").unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(
            config.credential_adapter().unwrap().legacy_header(),
            "x-token"
        );
        assert!(matches!(
            Config::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
