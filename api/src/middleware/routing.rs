//! Per-router default store declaration.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use mcp_registry_core::routing::{DataStoreKey, routed};
use tower::{Layer, Service, ServiceExt};

/// Makes `key` the active store for every request the wrapped router
/// handles. Stores and services that declare their own store still win for
/// their operations.
#[derive(Clone, Copy, Debug)]
pub struct RoutingLayer {
    key: DataStoreKey,
}

impl RoutingLayer {
    pub fn new(key: DataStoreKey) -> Self {
        Self { key }
    }

    pub fn reader() -> Self {
        Self::new(DataStoreKey::Reader)
    }

    pub fn writer() -> Self {
        Self::new(DataStoreKey::Writer)
    }
}

impl<S> Layer<S> for RoutingLayer {
    type Service = RoutingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RoutingService {
            inner,
            key: self.key,
        }
    }
}

#[derive(Clone)]
pub struct RoutingService<S> {
    inner: S,
    key: DataStoreKey,
}

impl<S> Service<Request> for RoutingService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let key = self.key;

        Box::pin(async move {
            let response = routed(key, ready.oneshot(req)).await;
            Ok(response.into_response())
        })
    }
}
