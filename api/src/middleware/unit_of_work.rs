//! Opens a fresh unit of work per request: an empty routing scope plus the
//! ambient request context the session lookup reads from.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::header::COOKIE;
use axum::response::{IntoResponse, Response};
use mcp_registry_core::routing::RoutingContext;
use mcp_registry_core::session::{
    GENERIC_SESSION_HEADER, LEGACY_SESSION_ID_KEY, RequestContext, SESSION_ID_KEY,
    with_request_context,
};
use tower::{Layer, Service, ServiceExt};

const SESSION_HEADERS: [&str; 3] = [SESSION_ID_KEY, LEGACY_SESSION_ID_KEY, GENERIC_SESSION_HEADER];

#[derive(Clone, Copy, Debug, Default)]
pub struct UnitOfWorkLayer;

impl<S> Layer<S> for UnitOfWorkLayer {
    type Service = UnitOfWorkService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UnitOfWorkService { inner }
    }
}

#[derive(Clone)]
pub struct UnitOfWorkService<S> {
    inner: S,
}

impl<S> Service<Request> for UnitOfWorkService<S>
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
        let ctx = request_context(&req);

        Box::pin(async move {
            let response =
                RoutingContext::scope(with_request_context(ctx, ready.oneshot(req))).await;
            Ok(response.into_response())
        })
    }
}

fn request_context(req: &Request) -> RequestContext {
    let headers = req.headers();
    let mut ctx = RequestContext::new();

    for name in SESSION_HEADERS {
        for value in headers.get_all(name) {
            if let Ok(value) = value.to_str() {
                ctx = ctx.with_header(name, value);
            }
        }
    }
    if let Some(query) = req.uri().query() {
        ctx = ctx.with_query(query);
    }
    for cookie in headers.get_all(COOKIE) {
        if let Ok(raw) = cookie.to_str() {
            ctx = ctx.with_cookie_header(raw);
        }
    }
    ctx
}
