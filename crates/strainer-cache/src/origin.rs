use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::future::Future;
use std::sync::Arc;

use crate::error::BoxError;

/// The handler the cache sits in front of.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError>;
}

#[async_trait]
impl<T: Origin + ?Sized> Origin for Arc<T> {
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
        (**self).call(request).await
    }
}

/// An [`Origin`] backed by an async closure. See [`origin_fn`].
#[derive(Clone)]
pub struct OriginFn<F> {
    f: F,
}

/// Wrap `f` as an [`Origin`].
///
/// ```
/// use bytes::Bytes;
/// use http::Response;
/// use strainer_cache::{origin_fn, BoxError};
///
/// let origin = origin_fn(|_req| async {
///     Ok::<_, BoxError>(Response::new(Bytes::from_static(b"Hello World")))
/// });
/// # let _ = origin;
/// ```
pub fn origin_fn<F, Fut>(f: F) -> OriginFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, BoxError>> + Send,
{
    OriginFn { f }
}

#[async_trait]
impl<F, Fut> Origin for OriginFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, BoxError>> + Send,
{
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
        (self.f)(request).await
    }
}
