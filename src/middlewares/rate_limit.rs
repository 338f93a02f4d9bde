use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::warn;

use super::ClientIp;

/// Requests per hour allowed per source address across all routes.
pub const GLOBAL_RATE_LIMIT_PER_HOUR: u32 = 12;

/// Requests per minute allowed per source address on the webhook route.
pub const WEBHOOK_RATE_LIMIT_PER_MINUTE: u32 = 4;

/// Keyed token-bucket limiter; buckets are created lazily per address.
pub type IpRateLimiter = DefaultKeyedRateLimiter<IpAddr>;

pub fn global_limiter() -> Arc<IpRateLimiter> {
    let per_hour = NonZeroU32::new(GLOBAL_RATE_LIMIT_PER_HOUR).expect("rate limit is nonzero");
    Arc::new(RateLimiter::keyed(Quota::per_hour(per_hour)))
}

pub fn webhook_limiter() -> Arc<IpRateLimiter> {
    let per_minute =
        NonZeroU32::new(WEBHOOK_RATE_LIMIT_PER_MINUTE).expect("rate limit is nonzero");
    Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute)))
}

/// Middleware enforcing a keyed limiter against the resolved client address.
pub async fn rate_limit(
    State(limiter): State<Arc<IpRateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = req
        .extensions()
        .get::<ClientIp>()
        .map(|c| c.0)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    if limiter.check_key(&ip).is_err() {
        warn!(%ip, path = req.uri().path(), "rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_bucket_allows_burst_then_rejects() {
        let limiter = webhook_limiter();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..WEBHOOK_RATE_LIMIT_PER_MINUTE {
            assert!(limiter.check_key(&ip).is_ok());
        }
        assert!(limiter.check_key(&ip).is_err());
    }

    #[test]
    fn buckets_are_independent_per_address() {
        let limiter = webhook_limiter();
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();

        for _ in 0..WEBHOOK_RATE_LIMIT_PER_MINUTE {
            assert!(limiter.check_key(&first).is_ok());
        }
        assert!(limiter.check_key(&first).is_err());
        assert!(limiter.check_key(&second).is_ok());
    }
}
