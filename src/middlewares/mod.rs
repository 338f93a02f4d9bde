//! Cross-cutting request middleware: request ids, client IP extraction, and
//! the structured access log. Rate limiting lives in its own module.

pub mod rate_limit;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;
use uuid::Uuid;

/// Unique id assigned to every request, echoed back in `x-request-id`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Source address of the request after `X-Forwarded-For` / `X-Real-Ip`
/// resolution. Rate limiting keys on this.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Resolves the real client address: the first `X-Forwarded-For` hop, then
/// `X-Real-Ip`, then the socket peer address.
pub async fn client_ip(mut req: Request, next: Next) -> Response {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    let real_ip = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let ip = forwarded
        .or(real_ip)
        .or(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

pub async fn access_log(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let response = next.run(req).await;

    info!(
        %method,
        path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        request_id,
        "http_request"
    );

    response
}
