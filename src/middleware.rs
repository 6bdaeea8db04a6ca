//! Tower middleware that puts the cached backend on a request path.
//!
//! [`AuthorizeLayer`] wraps a service. For every request it derives an
//! [`AuthRepRequest`] via [`AsAuthRequest`], asks the [`CachedBackend`] for a
//! verdict, and either forwards the request or fails with a typed error. The
//! middleware does not know how the decision is made, only that the backend
//! produces one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;

use crate::backend::{AuthRepRequest, Authorizer, CachedBackend};
use crate::cache::Cacheable;
use crate::error::BackendError;
use crate::telemetry::TelemetrySink;

/// Extraction seam: how a transport request names its service, application,
/// and metric hits.
pub trait AsAuthRequest {
    fn auth_request(&self) -> AuthRepRequest;
}

/// Error type produced by [`AuthorizeService`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError<E> {
    /// The caller is over its limits (locally or per the remote verdict).
    #[error("request denied: {reason}")]
    Denied { reason: String },
    /// The authorization decision itself failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The wrapped service failed after the request was admitted.
    #[error("{0}")]
    Inner(E),
}

impl<E> GatewayError<E> {
    pub fn is_denied(&self) -> bool {
        matches!(self, GatewayError::Denied { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            GatewayError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// A layer that authorizes requests against a [`CachedBackend`].
pub struct AuthorizeLayer<C, A, T> {
    backend: Arc<CachedBackend<C, A, T>>,
}

impl<C, A, T> AuthorizeLayer<C, A, T> {
    pub fn new(backend: Arc<CachedBackend<C, A, T>>) -> Self {
        Self { backend }
    }
}

impl<C, A, T> Clone for AuthorizeLayer<C, A, T> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<S, C, A, T> Layer<S> for AuthorizeLayer<C, A, T> {
    type Service = AuthorizeService<S, C, A, T>;

    fn layer(&self, service: S) -> Self::Service {
        AuthorizeService { inner: service, backend: Arc::clone(&self.backend) }
    }
}

/// Middleware service produced by [`AuthorizeLayer`].
pub struct AuthorizeService<S, C, A, T> {
    inner: S,
    backend: Arc<CachedBackend<C, A, T>>,
}

impl<S: Clone, C, A, T> Clone for AuthorizeService<S, C, A, T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), backend: Arc::clone(&self.backend) }
    }
}

impl<S, C, A, T, Req> Service<Req> for AuthorizeService<S, C, A, T>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    C: Cacheable + Send + Sync + 'static,
    A: Authorizer + Send + Sync + 'static,
    T: TelemetrySink + Sync,
    T::Future: Send + 'static,
    Req: AsAuthRequest + Send + 'static,
{
    type Response = S::Response;
    type Error = GatewayError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GatewayError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let backend = Arc::clone(&self.backend);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let auth_request = req.auth_request();
            match backend.authorize_and_report(&auth_request).await {
                Ok(response) if response.success => {
                    inner.call(req).await.map_err(GatewayError::Inner)
                }
                Ok(response) => {
                    let reason = response
                        .rejection
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "over limits".to_string());
                    Err(GatewayError::Denied { reason })
                }
                Err(e) => Err(GatewayError::Backend(e)),
            }
        })
    }
}
