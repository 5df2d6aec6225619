//! Request middleware: per-IP rate limiting.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::AppState;

/// In-memory rate limiter state.
///
/// Uses a simple fixed window counter keyed by client IP.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<IpAddr, (u32, Instant)>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check if the request is allowed.
    ///
    /// Returns `true` if allowed, `false` if limit exceeded.
    pub fn check(&self, key: IpAddr, limit: u32) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // Lock poisoned by a panicked thread. Recover with the stale
                // state — refusing all requests because of a poisoned rate
                // limiter would be a self-inflicted denial of service.
                tracing::error!("rate limiter lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };
        let now = Instant::now();

        // Periodic cleanup to prevent memory growth. Evict only entries
        // whose window has expired so active limits survive the sweep.
        if state.len() > 10000 {
            state.retain(|_, (_, start)| now.duration_since(*start) <= Duration::from_secs(60));
        }

        let (count, start) = state.entry(key).or_insert((0, now));

        if now.duration_since(*start) > Duration::from_secs(60) {
            // Reset window
            *count = 1;
            *start = now;
            true
        } else {
            *count += 1;
            *count <= limit
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate limiting middleware.
///
/// Report submissions get their own (tighter) limit since each one triggers
/// a write plus a fanout; everything else shares the default limit.
pub async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() else {
        // ConnectInfo must be injected by the server (or manually in tests).
        // Fail closed: a misconfigured deployment should be fixed, not
        // silently unlimited.
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };
    let key = addr.ip();

    let limit = if req.method() == Method::POST && req.uri().path() == "/api/incidents" {
        state.config.rate_limit.report_limit
    } else {
        state.config.rate_limit.default_limit
    };

    if !state.rate_limiter.check(key, limit) {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response.headers_mut().insert(
            axum::http::header::RETRY_AFTER,
            axum::http::HeaderValue::from_static("60"),
        );
        return Ok(response);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_allows_within_limit() {
        let limiter = RateLimiter::new();
        let key: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..5 {
            assert!(limiter.check(key, 5));
        }
        // 6th request should be denied
        assert!(!limiter.check(key, 5));
    }

    #[test]
    fn rate_limiter_different_keys_independent() {
        let limiter = RateLimiter::new();
        let key_a: IpAddr = "10.0.0.1".parse().unwrap();
        let key_b: IpAddr = "10.0.0.2".parse().unwrap();

        for _ in 0..3 {
            assert!(limiter.check(key_a, 3));
        }
        assert!(!limiter.check(key_a, 3));

        // key_b should still be allowed
        assert!(limiter.check(key_b, 3));
    }

    #[test]
    fn rate_limiter_eviction_preserves_active_limits() {
        let limiter = RateLimiter::new();

        // Fill with 10001 distinct IPs to trigger eviction
        for i in 0..10001u32 {
            let ip: IpAddr = std::net::Ipv4Addr::from(i.to_be_bytes()).into();
            limiter.check(ip, 100);
        }

        // The most recent IP is within its window, so its counter must have
        // survived the sweep rather than being reset by a blanket clear.
        let recent_ip: IpAddr = std::net::Ipv4Addr::from(10000u32.to_be_bytes()).into();
        for _ in 0..99 {
            assert!(limiter.check(recent_ip, 100));
        }
        assert!(!limiter.check(recent_ip, 100));
    }
}
