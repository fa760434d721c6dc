//! Upstream service abstraction.

use std::future::Future;

/// Trait for calling the upstream API.
///
/// The gateway never looks inside the upstream: it only sends requests and
/// receives responses through this trait. Test suites implement it with
/// in-process fakes.
///
/// ```rust,ignore
/// use cellgate_core::Upstream;
/// use std::future::Ready;
///
/// #[derive(Clone)]
/// struct Fixed(MyResponse);
///
/// impl Upstream<MyRequest> for Fixed {
///     type Response = Result<MyResponse, MyError>;
///     type Future = Ready<Self::Response>;
///
///     fn call(&mut self, _req: MyRequest) -> Self::Future {
///         std::future::ready(Ok(self.0.clone()))
///     }
/// }
/// ```
pub trait Upstream<Req> {
    /// The response type returned by the upstream service
    type Response;

    /// The future that resolves to the response
    type Future: Future<Output = Self::Response> + Send;

    /// Call the upstream service with the given request
    fn call(&mut self, req: Req) -> Self::Future;
}
