//! Tower service adapter and the HTTP/1 accept loop.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::{Pin, pin};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use cellgate_core::Upstream;
use cellgate_http::CachedResponse;
use http::{Request, Response};
use http_body::Body;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tower::Service;
use tracing::{debug, info, warn};

use crate::error::UpstreamError;
use crate::gateway::Gateway;

/// [`Gateway`] bound to one client connection.
pub struct GatewayService<U> {
    gateway: Gateway<U>,
    remote_addr: Option<SocketAddr>,
}

impl<U> GatewayService<U> {
    pub fn new(gateway: Gateway<U>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            gateway,
            remote_addr,
        }
    }
}

impl<U> Clone for GatewayService<U> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            remote_addr: self.remote_addr,
        }
    }
}

impl<U, B> Service<Request<B>> for GatewayService<U>
where
    U: Upstream<Request<Bytes>, Response = Result<CachedResponse, UpstreamError>>
        + Clone
        + Send
        + Sync
        + 'static,
    U::Future: 'static,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let gateway = self.gateway.clone();
        let remote_addr = self.remote_addr;
        Box::pin(async move {
            let response = gateway.handle(request, remote_addr).await;
            Ok(response.map(Full::new))
        })
    }
}

/// Accepts connections until `shutdown` resolves, then drains.
///
/// Open connections and background refreshes each get `drain_timeout` to
/// finish; refreshes still running after that are cancelled.
pub async fn serve<U, F>(listener: TcpListener, gateway: Gateway<U>, shutdown: F, drain_timeout: Duration)
where
    U: Upstream<Request<Bytes>, Response = Result<CachedResponse, UpstreamError>>
        + Clone
        + Send
        + Sync
        + 'static,
    U::Future: 'static,
    F: Future<Output = ()>,
{
    let graceful = GracefulShutdown::new();
    let mut shutdown = pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!(%error, "failed to accept connection");
                        continue;
                    }
                };
                let service = TowerToHyperService::new(GatewayService::new(gateway.clone(), Some(remote_addr)));
                let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                let connection = graceful.watch(connection);
                tokio::spawn(async move {
                    if let Err(error) = connection.await {
                        debug!(%remote_addr, %error, "connection ended with error");
                    }
                });
            }
            () = &mut shutdown => {
                info!("shutdown requested, draining connections");
                break;
            }
        }
    }
    drop(listener);

    tokio::select! {
        () = graceful.shutdown() => debug!("all connections closed"),
        () = tokio::time::sleep(drain_timeout) => warn!("connections still open after drain timeout"),
    }

    let offload = gateway.store().offload();
    if !offload.wait_all_timeout(drain_timeout).await {
        warn!(
            remaining = offload.active_task_count(),
            "cancelling unfinished background refreshes"
        );
        offload.cancel_all();
    }
    info!("shutdown complete");
}
