use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, Method, Request},
    middleware::Next,
    response::Response,
};
use dashmap::{DashMap, mapref::entry::Entry};

use crate::errors::AppError;
use crate::logging::{SanitizedIpAddr, SecurityEvent};

/// Fixed-window per-IP rate limiter shared by the auth form routes.
/// Only form submissions count against the window; rendering the form
/// with GET is never throttled.
#[derive(Clone)]
pub struct RateLimiterState {
    max_requests: u32,
    window: Duration,
    buckets: Arc<DashMap<IpAddr, RateWindow>>,
}

impl RateLimiterState {
    pub fn new(calls: NonZeroU32, window: Duration) -> Self {
        Self {
            max_requests: calls.get(),
            window,
            buckets: Arc::new(DashMap::new()),
        }
    }

    fn register(&self, ip: IpAddr, now: Instant) -> Result<(), Duration> {
        match self.buckets.entry(ip) {
            Entry::Occupied(mut entry) => {
                let bucket = entry.get_mut();
                let elapsed = now.duration_since(bucket.started_at);

                if elapsed >= self.window {
                    bucket.started_at = now;
                    bucket.hits = 0;
                }

                if bucket.hits >= self.max_requests {
                    let retry_after = self
                        .window
                        .checked_sub(elapsed.min(self.window))
                        .unwrap_or(Duration::from_secs(0));
                    return Err(retry_after);
                }

                bucket.hits += 1;
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(RateWindow {
                    started_at: now,
                    hits: 1,
                });
                Ok(())
            }
        }
    }
}

pub async fn enforce_rate_limit(
    State(state): State<RateLimiterState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    if request.method() == Method::POST {
        let client_ip = select_client_ip(request.headers(), addr.ip());
        let now = Instant::now();

        if state.register(client_ip, now).is_err() {
            crate::log_security_event!(
                SecurityEvent::RateLimitExceeded,
                client_ip = %SanitizedIpAddr::new(client_ip),
                "Rate limit exceeded for client"
            );

            return Err(AppError::RateLimitExceeded);
        }
    }

    Ok(next.run(request).await)
}

fn select_client_ip(headers: &HeaderMap, fallback: IpAddr) -> IpAddr {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|ip| ip.trim().parse().ok());

    forwarded.or(real_ip).unwrap_or(fallback)
}

#[derive(Debug)]
struct RateWindow {
    started_at: Instant,
    hits: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(calls: u32, window: Duration) -> RateLimiterState {
        RateLimiterState::new(NonZeroU32::new(calls).unwrap(), window)
    }

    #[test]
    fn test_requests_within_budget_pass() {
        let state = limiter(3, Duration::from_secs(60));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(state.register(ip, now).is_ok());
        }
        assert!(state.register(ip, now).is_err());
    }

    #[test]
    fn test_window_reset_allows_new_requests() {
        let state = limiter(1, Duration::from_secs(60));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let start = Instant::now();

        assert!(state.register(ip, start).is_ok());
        assert!(state.register(ip, start).is_err());
        assert!(state
            .register(ip, start + Duration::from_secs(61))
            .is_ok());
    }

    #[test]
    fn test_distinct_ips_have_independent_budgets() {
        let state = limiter(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(state.register("10.0.0.1".parse().unwrap(), now).is_ok());
        assert!(state.register("10.0.0.2".parse().unwrap(), now).is_ok());
    }

    #[test]
    fn test_forwarded_header_wins_over_socket_addr() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

        let fallback: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(
            select_client_ip(&headers, fallback),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
    }
}
