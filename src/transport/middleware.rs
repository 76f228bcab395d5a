//! Per-IP rate limiting for the JSON-RPC endpoint (§10 ambient stack).
//! Adapted from the source codebase's `api::middleware::rate_limit_middleware`
//! token-bucket idiom, backed by the same `governor` crate.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::net::SocketAddr;

type IpRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;
static RATE_LIMITERS: OnceLock<DashMap<IpAddr, IpRateLimiter>> = OnceLock::new();

fn rate_limiter_for(ip: IpAddr, requests_per_minute: u32) -> IpRateLimiter {
    let limiters = RATE_LIMITERS.get_or_init(DashMap::new);
    if let Some(limiter) = limiters.get(&ip) {
        return Arc::clone(&limiter);
    }
    let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute.max(1)).unwrap());
    let limiter = Arc::new(RateLimiter::direct(quota));
    limiters.insert(ip, Arc::clone(&limiter));
    limiter
}

fn client_ip(request: &Request) -> IpAddr {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(s) = forwarded.to_str() {
            if let Some(first) = s.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
}

/// Rejects requests past `requests_per_minute` per source IP with `429`.
pub async fn rate_limit(request: Request, next: Next) -> Result<Response, StatusCode> {
    const REQUESTS_PER_MINUTE: u32 = 600;
    let ip = client_ip(&request);
    let limiter = rate_limiter_for(ip, REQUESTS_PER_MINUTE);
    if limiter.check().is_err() {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_ip_reuses_its_limiter() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let a = rate_limiter_for(ip, 100);
        let b = rate_limiter_for(ip, 100);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn forwarded_for_header_picks_leftmost_ip() {
        let mut request = Request::builder().body(axum::body::Body::empty()).unwrap();
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.5, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&request), "203.0.113.5".parse::<IpAddr>().unwrap());
    }
}
