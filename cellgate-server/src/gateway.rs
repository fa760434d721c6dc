//! The request pipeline.
//!
//! ```text
//! request -> path normalization -> preflight? -> credential normalization
//!         -> auth lookup (protected paths) -> resource lookup / bypass
//!         -> CORS -> gzip -> diagnostic headers -> access log
//! ```

use std::collections::HashSet;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use cellgate::{CacheError, CacheStore, Lookup};
use cellgate_core::{CacheKey, CacheStatus, RequestClass, ResourceKey, Upstream};
use cellgate_http::headers::strip_hop_by_hop;
use cellgate_http::{
    CachedResponse, CorsPolicy, Credential, CredentialAdapter, Diagnostics, GzipNegotiator,
    PathNormalizer, UpstreamTimings,
};
use chrono::Utc;
use http::header::{
    ACCEPT_ENCODING, AUTHORIZATION, CONTENT_LENGTH, HOST, HeaderName, HeaderValue, ORIGIN,
    USER_AGENT,
};
use http::request::Parts;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{debug, warn};

use crate::access_log::AccessRecord;
use crate::config::Config;
use crate::error::{ConfigError, UpstreamError};

/// Path and query of the original request, sent with the auth sub-request.
pub const X_ORIGINAL_URI: HeaderName = HeaderName::from_static("x-original-uri");
/// Method of the original request, sent with the auth sub-request.
pub const X_ORIGINAL_METHOD: HeaderName = HeaderName::from_static("x-original-method");

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Store holding both auth decisions and resource responses.
pub type GatewayStore = CacheStore<CachedResponse, UpstreamError>;

/// What is known about the request being handled.
struct Exchange {
    started: Instant,
    remote_addr: Option<SocketAddr>,
    method: Method,
    scheme: String,
    host: Option<String>,
    path: String,
    query: Option<String>,
    origin: Option<HeaderValue>,
    request_headers: HeaderMap,
    user_agent: Option<String>,
    auth_status: Option<CacheStatus>,
}

impl Exchange {
    fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(
            &self.scheme,
            self.host.as_deref().unwrap_or_default(),
            self.path.as_str(),
            self.query.as_deref().unwrap_or_default(),
        )
    }
}

struct Inner<U> {
    store: GatewayStore,
    upstream: U,
    paths: PathNormalizer,
    credentials: CredentialAdapter,
    cors: CorsPolicy,
    gzip: Option<GzipNegotiator>,
    auth_path: String,
    public_paths: HashSet<String>,
    max_body_size: usize,
}

/// Auth-delegating, caching gateway in front of one upstream.
pub struct Gateway<U> {
    inner: Arc<Inner<U>>,
}

impl<U> Clone for Gateway<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U> std::fmt::Debug for Gateway<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("store", &self.inner.store)
            .field("auth_path", &self.inner.auth_path)
            .field("public_paths", &self.inner.public_paths)
            .finish()
    }
}

impl<U> Gateway<U>
where
    U: Upstream<Request<Bytes>, Response = Result<CachedResponse, UpstreamError>>
        + Clone
        + Send
        + Sync
        + 'static,
    U::Future: 'static,
{
    /// Builder with default settings.
    pub fn builder(store: GatewayStore, upstream: U) -> GatewayBuilder<U> {
        GatewayBuilder::new(store, upstream)
    }

    /// Builds a gateway from validated configuration.
    pub fn from_config(config: &Config, store: GatewayStore, upstream: U) -> Result<Self, ConfigError> {
        let max_body_size = usize::try_from(config.server.max_body_size.as_u64()).unwrap_or(usize::MAX);
        Ok(Self::builder(store, upstream)
            .paths(config.path_normalizer())
            .credentials(config.credential_adapter()?)
            .cors(config.cors_policy()?)
            .gzip(config.gzip())
            .auth_path(config.auth.path.clone())
            .public_paths(config.auth.public_paths.iter().cloned())
            .max_body_size(max_body_size)
            .build())
    }

    /// The shared cache store.
    pub fn store(&self) -> &GatewayStore {
        &self.inner.store
    }

    /// Handles one request end to end. Never fails: every error becomes a response.
    pub async fn handle<B>(&self, request: Request<B>, remote_addr: Option<SocketAddr>) -> Response<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let (mut parts, body) = request.into_parts();
        let mut exchange = self.exchange(&parts, remote_addr);

        if parts.method == Method::OPTIONS {
            return self.preflight(&exchange);
        }

        if exchange.path == self.inner.auth_path {
            debug!(path = %exchange.path, "auth endpoint requested directly");
            let response = CachedResponse::json_message(StatusCode::NOT_FOUND, "Not Found");
            return self.shape(&exchange, response, CacheStatus::Bypass);
        }

        let body = match Limited::new(body, self.inner.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(error) => {
                let response = if error.downcast_ref::<LengthLimitError>().is_some() {
                    CachedResponse::json_message(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "Request body too large",
                    )
                } else {
                    warn!(%error, "failed to read request body");
                    CachedResponse::json_message(StatusCode::BAD_REQUEST, "Invalid request body")
                };
                return self.shape(&exchange, response, CacheStatus::Bypass);
            }
        };

        let credential = self.inner.credentials.normalize(&mut parts.headers);
        let class = if self.inner.public_paths.contains(&exchange.path) {
            RequestClass::Public
        } else {
            let Some(credential) = credential else {
                debug!(path = %exchange.path, "no credential on protected path");
                let response = CachedResponse::json_message(StatusCode::UNAUTHORIZED, "Unauthorized");
                return self.shape(&exchange, response, CacheStatus::Bypass);
            };
            match self.authorize(&credential, &exchange).await {
                Ok(status) => exchange.auth_status = Some(status),
                Err((response, status)) => {
                    exchange.auth_status = status;
                    return self.shape(&exchange, response, CacheStatus::Bypass);
                }
            }
            RequestClass::Resource
        };

        let cacheable = matches!(parts.method, Method::GET | Method::HEAD);
        let forwarded = self.forward_request(&exchange, parts, body);
        let (response, status) = if cacheable {
            let key = CacheKey::Resource(exchange.resource_key());
            match self
                .inner
                .store
                .get_or_fetch(key, class, forwarded, self.inner.upstream.clone())
                .await
            {
                Ok(Lookup { response, status }) => (response, status),
                Err(error) => (failure_response(&error), error.status()),
            }
        } else {
            let mut upstream = self.inner.upstream.clone();
            match upstream.call(forwarded).await {
                Ok(response) => (response, CacheStatus::Bypass),
                Err(error) => {
                    warn!(path = %exchange.path, %error, "uncached upstream call failed");
                    (upstream_error_response(&error), CacheStatus::Bypass)
                }
            }
        };

        self.shape(&exchange, response, status)
    }

    fn exchange(&self, parts: &Parts, remote_addr: Option<SocketAddr>) -> Exchange {
        let host = parts
            .headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .or_else(|| parts.uri.authority().map(|authority| authority.to_string()));
        Exchange {
            started: Instant::now(),
            remote_addr,
            method: parts.method.clone(),
            scheme: parts.uri.scheme_str().unwrap_or("http").to_owned(),
            host,
            path: self.inner.paths.normalize(parts.uri.path()).into_owned(),
            query: parts.uri.query().map(str::to_owned),
            origin: self.inner.cors.allowed_origin(&parts.headers),
            request_headers: parts.headers.clone(),
            user_agent: parts
                .headers
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
            auth_status: None,
        }
    }

    /// Runs the auth sub-request through the cache.
    ///
    /// Returns the auth lookup outcome on allow, or the response to send
    /// instead of the resource.
    async fn authorize(
        &self,
        credential: &Credential,
        exchange: &Exchange,
    ) -> Result<CacheStatus, (CachedResponse, Option<CacheStatus>)> {
        let request = self.auth_request(credential, exchange).map_err(|error| {
            warn!(%error, "failed to build auth request");
            (
                CachedResponse::json_message(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
                None,
            )
        })?;

        let key = CacheKey::Auth(credential.hash());
        let lookup = self
            .inner
            .store
            .get_or_fetch(key, RequestClass::Auth, request, self.inner.upstream.clone())
            .await;

        match lookup {
            Ok(Lookup { response, status }) => {
                let code = response.status_code();
                if code.is_success() {
                    Ok(status)
                } else if code == StatusCode::UNAUTHORIZED || code == StatusCode::FORBIDDEN {
                    debug!(status = code.as_u16(), path = %exchange.path, "authorization denied");
                    Err((response, Some(status)))
                } else {
                    warn!(status = code.as_u16(), "unexpected authorization status");
                    Err((
                        CachedResponse::json_message(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Authorization check failed",
                        ),
                        Some(status),
                    ))
                }
            }
            Err(error) => {
                warn!(%error, "authorization check failed");
                Err((failure_response(&error), Some(error.status())))
            }
        }
    }

    fn auth_request(&self, credential: &Credential, exchange: &Exchange) -> Result<Request<Bytes>, http::Error> {
        Request::builder()
            .method(Method::GET)
            .uri(self.inner.auth_path.as_str())
            .header(AUTHORIZATION, credential.header_value().clone())
            .header(CONTENT_LENGTH, HeaderValue::from_static("0"))
            .header(X_ORIGINAL_URI, exchange.path_and_query())
            .header(X_ORIGINAL_METHOD, exchange.method.as_str())
            .body(Bytes::new())
    }

    /// Rewrites the client request for the upstream.
    ///
    /// HEAD is sent as GET so the stored entry can serve both.
    fn forward_request(&self, exchange: &Exchange, mut parts: Parts, body: Bytes) -> Request<Bytes> {
        let headers = &mut parts.headers;
        strip_hop_by_hop(headers);
        headers.remove(ACCEPT_ENCODING);
        headers.remove(ORIGIN);
        headers.remove(HOST);
        headers.remove(self.inner.credentials.legacy_header());

        if let Some(host) = exchange.host.as_deref().and_then(|host| HeaderValue::from_str(host).ok()) {
            headers.insert(X_FORWARDED_HOST, host);
        }
        if let Ok(scheme) = HeaderValue::from_str(&exchange.scheme) {
            headers.insert(X_FORWARDED_PROTO, scheme);
        }
        if let Some(addr) = exchange.remote_addr {
            let ip = addr.ip().to_string();
            let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|value| value.to_str().ok()) {
                Some(existing) => format!("{existing}, {ip}"),
                None => ip.clone(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(X_FORWARDED_FOR, value);
            }
            if let Ok(value) = HeaderValue::from_str(&ip) {
                headers.insert(X_REAL_IP, value);
            }
        }

        if parts.method == Method::HEAD {
            parts.method = Method::GET;
        }
        parts.uri = Uri::try_from(exchange.path_and_query()).unwrap_or_default();
        Request::from_parts(parts, body)
    }

    fn preflight(&self, exchange: &Exchange) -> Response<Bytes> {
        let mut response = Response::new(Bytes::new());
        *response.status_mut() = StatusCode::NO_CONTENT;
        *response.headers_mut() = self.inner.cors.preflight(exchange.origin.as_ref());
        self.respond(exchange, response, None, UpstreamTimings::default(), None)
    }

    /// Applies CORS, compression and diagnostic headers, then logs.
    fn shape(&self, exchange: &Exchange, response: CachedResponse, cache: CacheStatus) -> Response<Bytes> {
        let timings = response.timings();
        let (status, mut headers, body) = response.into_parts();

        self.inner.cors.apply(exchange.origin.as_ref(), &mut headers);

        let (body, gzip_ratio) = if exchange.method == Method::HEAD {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            (Bytes::new(), None)
        } else if let Some(gzip) = &self.inner.gzip {
            gzip.encode(&exchange.request_headers, &mut headers, body)
        } else {
            (body, None)
        };

        Diagnostics {
            cache,
            auth_cache: exchange.auth_status,
            total_time: exchange.started.elapsed(),
        }
        .apply(&mut headers);

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        self.respond(exchange, response, gzip_ratio, timings, Some(cache))
    }

    fn respond(
        &self,
        exchange: &Exchange,
        response: Response<Bytes>,
        gzip_ratio: Option<f64>,
        upstream: UpstreamTimings,
        cache_status: Option<CacheStatus>,
    ) -> Response<Bytes> {
        AccessRecord {
            time: Utc::now(),
            remote_addr: exchange.remote_addr,
            method: exchange.method.clone(),
            path: exchange.path_and_query(),
            status: response.status(),
            bytes_sent: response.body().len(),
            user_agent: exchange.user_agent.clone(),
            gzip_ratio,
            request_time: exchange.started.elapsed(),
            upstream,
            cache_status,
            auth_cache_status: exchange.auth_status,
        }
        .emit();
        response
    }
}

fn upstream_error_response(error: &UpstreamError) -> CachedResponse {
    let message = match error {
        UpstreamError::Timeout(_) => "Upstream timed out",
        _ => "Upstream unavailable",
    };
    CachedResponse::json_message(error.status_code(), message)
}

fn failure_response(error: &CacheError<UpstreamError>) -> CachedResponse {
    match error {
        CacheError::Upstream { source, .. } => upstream_error_response(source),
        CacheError::Concurrency { .. } => {
            CachedResponse::json_message(StatusCode::BAD_GATEWAY, "Upstream unavailable")
        }
    }
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder<U> {
    store: GatewayStore,
    upstream: U,
    paths: PathNormalizer,
    credentials: CredentialAdapter,
    cors: CorsPolicy,
    gzip: Option<GzipNegotiator>,
    auth_path: String,
    public_paths: HashSet<String>,
    max_body_size: usize,
}

impl<U> GatewayBuilder<U> {
    fn new(store: GatewayStore, upstream: U) -> Self {
        let defaults = crate::config::AuthConfig::default();
        Self {
            store,
            upstream,
            paths: PathNormalizer::disabled(),
            credentials: CredentialAdapter::default(),
            cors: CorsPolicy::default(),
            gzip: Some(GzipNegotiator::default()),
            auth_path: defaults.path,
            public_paths: defaults.public_paths.into_iter().collect(),
            max_body_size: 10 * 1024 * 1024,
        }
    }

    pub fn paths(mut self, paths: PathNormalizer) -> Self {
        self.paths = paths;
        self
    }

    pub fn credentials(mut self, credentials: CredentialAdapter) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = cors;
        self
    }

    /// `None` disables compression.
    pub fn gzip(mut self, gzip: Option<GzipNegotiator>) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    pub fn public_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.public_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn build(self) -> Gateway<U> {
        Gateway {
            inner: Arc::new(Inner {
                store: self.store,
                upstream: self.upstream,
                paths: self.paths,
                credentials: self.credentials,
                cors: self.cors,
                gzip: self.gzip,
                auth_path: self.auth_path,
                public_paths: self.public_paths,
                max_body_size: self.max_body_size,
            }),
        }
    }
}
