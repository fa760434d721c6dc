//! Upstream Client: a pooled hyper client that reports per-phase timings.
//!
//! There are no retries. A failure surfaces as [`UpstreamError`] and the
//! cache store decides whether a retained entry can stand in for it.

use std::error::Error as StdError;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cellgate_core::Upstream;
use cellgate_http::{CachedResponse, UpstreamTimings};
use futures::future::BoxFuture;
use http::uri::PathAndQuery;
use http::{Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioIo};
use pin_project::pin_project;
use tokio::net::TcpStream;
use tower::Service;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

/// Connect duration attached to a pooled connection.
///
/// Only the first response on a connection reports it; later responses reuse
/// the connection and report zero.
#[derive(Clone, Debug)]
struct ConnectTiming {
    elapsed: Duration,
    reported: Arc<AtomicBool>,
}

impl ConnectTiming {
    fn take(&self) -> Duration {
        if self.reported.swap(true, Ordering::AcqRel) {
            Duration::ZERO
        } else {
            self.elapsed
        }
    }
}

/// TCP connection that remembers how long it took to establish.
#[pin_project]
pub struct TimedConnection {
    #[pin]
    io: TokioIo<TcpStream>,
    timing: ConnectTiming,
}

impl Read for TimedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Read::poll_read(self.project().io, cx, buf)
    }
}

impl Write for TimedConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Write::poll_write(self.project().io, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Write::poll_flush(self.project().io, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Write::poll_shutdown(self.project().io, cx)
    }

    fn is_write_vectored(&self) -> bool {
        Write::is_write_vectored(&self.io)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Write::poll_write_vectored(self.project().io, cx, bufs)
    }
}

impl Connection for TimedConnection {
    fn connected(&self) -> Connected {
        self.io.connected().extra(self.timing.clone())
    }
}

/// [`HttpConnector`] wrapper producing [`TimedConnection`]s.
#[derive(Clone)]
pub struct TimedConnector {
    inner: HttpConnector,
}

impl TimedConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut inner = HttpConnector::new();
        inner.set_connect_timeout(Some(connect_timeout));
        inner.set_nodelay(true);
        Self { inner }
    }
}

impl Service<Uri> for TimedConnector {
    type Response = TimedConnection;
    type Error = <HttpConnector as Service<Uri>>::Error;
    type Future = BoxFuture<'static, Result<TimedConnection, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let started = Instant::now();
        let connecting = self.inner.call(dst);
        Box::pin(async move {
            let io = connecting.await?;
            Ok(TimedConnection {
                io,
                timing: ConnectTiming {
                    elapsed: started.elapsed(),
                    reported: Arc::new(AtomicBool::new(false)),
                },
            })
        })
    }
}

/// Client for the resource API.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client<TimedConnector, Full<Bytes>>,
    base: Uri,
    connect_timeout: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for HttpUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstream")
            .field("base", &self.base)
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpUpstream {
    /// Creates a client sending every request to the scheme and authority of `base`.
    pub fn new(base: Uri, config: &UpstreamConfig) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .build(TimedConnector::new(config.connect_timeout));
        Self {
            client,
            base,
            connect_timeout: config.connect_timeout,
            timeout: config.timeout,
        }
    }

    /// Sends `request` (whose URI only contributes path and query) and
    /// buffers the response.
    pub async fn send(&self, request: Request<Bytes>) -> Result<CachedResponse, UpstreamError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = self.target(&parts.uri)?;
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let request = Request::from_parts(parts, Full::new(body));

        let started = Instant::now();
        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|error| self.classify(error))?;
            let header = started.elapsed();
            let connect = response
                .extensions()
                .get::<ConnectTiming>()
                .map(ConnectTiming::take);

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(UpstreamError::request)?
                .to_bytes();

            Ok(CachedResponse::new(parts.status, parts.headers, body).with_timings(
                UpstreamTimings {
                    connect,
                    header: Some(header),
                    response: Some(started.elapsed()),
                },
            ))
        };

        let result = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
        };
        match &result {
            Ok(response) => debug!(
                %method, %uri,
                status = response.status_code().as_u16(),
                elapsed_ms = started.elapsed().as_millis(),
                "upstream responded"
            ),
            Err(error) => debug!(%method, %uri, %error, "upstream failed"),
        }
        result
    }

    fn target(&self, uri: &Uri) -> Result<Uri, UpstreamError> {
        let mut parts = self.base.clone().into_parts();
        parts.path_and_query = Some(
            uri.path_and_query()
                .cloned()
                .unwrap_or_else(|| PathAndQuery::from_static("/")),
        );
        Uri::from_parts(parts).map_err(UpstreamError::invalid)
    }

    fn classify(&self, error: hyper_util::client::legacy::Error) -> UpstreamError {
        if is_timeout(&error) {
            UpstreamError::Timeout(self.connect_timeout)
        } else if error.is_connect() {
            UpstreamError::connect(error)
        } else {
            UpstreamError::request(error)
        }
    }
}

fn is_timeout(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(error) = current {
        if let Some(io) = error.downcast_ref::<io::Error>() {
            if io.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        current = error.source();
    }
    false
}

impl Upstream<Request<Bytes>> for HttpUpstream {
    type Response = Result<CachedResponse, UpstreamError>;
    type Future = BoxFuture<'static, Self::Response>;

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let upstream = self.clone();
        Box::pin(async move { upstream.send(request).await })
    }
}
