use std::net::{IpAddr, SocketAddr};
use std::task::{Context, Poll};

use axum::extract::connect_info::ConnectInfo;
use axum::http::{Extensions, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::future::BoxFuture;
use serde_json::json;
use tower::{Layer, Service};

use crate::config::AllowedIps;

/// Restricts a route to provider source addresses.
#[derive(Clone, Debug)]
pub struct SourceAllowlistLayer {
    allowed: AllowedIps,
    trusted_proxy_depth: usize,
}

impl SourceAllowlistLayer {
    pub fn new(allowed: AllowedIps, trusted_proxy_depth: usize) -> Self {
        Self {
            allowed,
            trusted_proxy_depth,
        }
    }
}

impl<S> Layer<S> for SourceAllowlistLayer {
    type Service = SourceAllowlist<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SourceAllowlist {
            inner,
            allowed: self.allowed.clone(),
            trusted_proxy_depth: self.trusted_proxy_depth,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SourceAllowlist<S> {
    inner: S,
    allowed: AllowedIps,
    trusted_proxy_depth: usize,
}

impl<S, B> Service<Request<B>> for SourceAllowlist<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let source = client_ip(req.headers(), req.extensions(), self.trusted_proxy_depth);

        if !permits(&self.allowed, source) {
            tracing::warn!(
                source = ?source,
                path = %req.uri().path(),
                "rejected webhook delivery from unlisted source"
            );
            let response = (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "source address not allowed", "status": 403 })),
            )
                .into_response();
            return Box::pin(async move { Ok(response) });
        }

        // Take the service that was driven to readiness and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}

fn permits(allowed: &AllowedIps, source: Option<IpAddr>) -> bool {
    match (allowed, source) {
        (AllowedIps::Any, _) => true,
        (AllowedIps::Cidrs(nets), Some(ip)) => nets.iter().any(|net| net.contains(&ip)),
        (AllowedIps::Cidrs(_), None) => false,
    }
}

/// Resolves the caller address. `X-Forwarded-For` is only read when trusted
/// proxies sit in front of the service; otherwise the socket peer is used.
fn client_ip(headers: &HeaderMap, extensions: &Extensions, trusted_proxy_depth: usize) -> Option<IpAddr> {
    forwarded_client(headers, trusted_proxy_depth).or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

fn forwarded_client(headers: &HeaderMap, trusted_proxy_depth: usize) -> Option<IpAddr> {
    if trusted_proxy_depth == 0 {
        return None;
    }
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;

    // Each trusted proxy appends the peer it saw on the right; anything
    // further left was supplied by the caller.
    raw.rsplit(',')
        .map(str::trim)
        .filter_map(parse_hop)
        .nth(trusted_proxy_depth - 1)
}

fn parse_hop(hop: &str) -> Option<IpAddr> {
    hop.parse::<IpAddr>()
        .ok()
        .or_else(|| hop.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}
