//! Fixed-window admission control for the protected scope.
//!
//! Each client key owns a `{count, window_start}` pair. A window opens on the
//! first request from a key and closes `window` later; the next request after
//! that opens a fresh window with the count back at zero.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::middleware::Next;
use actix_web::{web, Error, ResponseError};
use dashmap::DashMap;

use crate::error::GatewayError;
use crate::metrics::RATE_LIMITED_TOTAL;

pub const RATELIMIT_HEADER: HeaderName = HeaderName::from_static("ratelimit");
pub const RATELIMIT_POLICY_HEADER: HeaderName = HeaderName::from_static("ratelimit-policy");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    started: Instant,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the caller's current window closes.
    pub reset_after: Duration,
}

impl Admission {
    /// Seconds until reset, rounded up so clients never retry early.
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Per-client fixed-window counter set, shared by every request handler.
pub struct WindowLimiter {
    max_requests: u32,
    window: Duration,
    windows: DashMap<String, WindowState>,
}

impl WindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request from `key` at `now`, unless that would exceed the limit.
    ///
    /// The entry is held under its shard lock for the whole check-and-increment,
    /// so concurrent callers for the same key can never over-admit.
    pub fn admit(&self, key: &str, now: Instant) -> Admission {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(WindowState {
                count: 0,
                started: now,
            });
        let state = entry.value_mut();

        if now.saturating_duration_since(state.started) >= self.window {
            state.count = 0;
            state.started = now;
        }

        let allowed = state.count < self.max_requests;
        if allowed {
            state.count += 1;
        }

        let reset_after = (state.started + self.window).saturating_duration_since(now);
        Admission {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests - state.count,
            reset_after,
        }
    }

    /// Drop windows that have fully elapsed. Returns the number removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, state| now.saturating_duration_since(state.started) < self.window);
        before - self.windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Write the draft-7 `RateLimit-Policy` and `RateLimit` headers.
    pub fn write_headers(&self, admission: &Admission, headers: &mut HeaderMap) {
        let policy = format!("{};w={}", admission.limit, self.window.as_secs());
        let status = format!(
            "limit={}, remaining={}, reset={}",
            admission.limit,
            admission.remaining,
            admission.reset_secs()
        );
        if let Ok(v) = HeaderValue::from_str(&policy) {
            headers.insert(RATELIMIT_POLICY_HEADER, v);
        }
        if let Ok(v) = HeaderValue::from_str(&status) {
            headers.insert(RATELIMIT_HEADER, v);
        }
    }
}

/// Which client a request is charged to.
///
/// With `trust_proxy`, exactly one proxy hop is trusted: the key is the
/// rightmost `X-Forwarded-For` entry, the one that hop appended. Entries to
/// its left are client-controlled and ignored. Otherwise, or when the header
/// is absent, the TCP peer is used.
pub fn client_key(req: &ServiceRequest, trust_proxy: bool) -> String {
    let forwarded = if trust_proxy {
        last_forwarded_for(req.headers())
    } else {
        None
    };
    let raw = forwarded.or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()));

    match raw {
        Some(addr) => addr
            .parse::<SocketAddr>()
            .map(|sock| sock.ip().to_string())
            .unwrap_or(addr),
        None => "unknown".to_string(),
    }
}

/// Rightmost non-empty entry across every `X-Forwarded-For` header line.
fn last_forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(X_FORWARDED_FOR)
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .last()
        .map(String::from)
}

/// Settings the admission middleware needs besides the limiter itself.
#[derive(Debug, Clone, Copy)]
pub struct ClientKeyPolicy {
    pub trust_proxy: bool,
}

/// Scope middleware: admit or reject before anything else in `/api` runs,
/// and stamp rate-limit headers on every response either way.
pub async fn enforce_rate_limit<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    let limiter = req.app_data::<web::Data<WindowLimiter>>().cloned();
    let Some(limiter) = limiter else {
        let err = GatewayError::Internal("rate limiter not registered".to_string());
        return Ok(req.error_response(err).map_into_right_body());
    };
    let trust_proxy = req
        .app_data::<web::Data<ClientKeyPolicy>>()
        .map(|p| p.trust_proxy)
        .unwrap_or(false);

    let key = client_key(&req, trust_proxy);
    let admission = limiter.admit(&key, Instant::now());

    if !admission.allowed {
        RATE_LIMITED_TOTAL.inc();
        tracing::warn!(client = %key, limit = admission.limit, "rate limit exceeded");
        let mut res = req.into_response(GatewayError::RateLimited.error_response());
        let headers = res.headers_mut();
        limiter.write_headers(&admission, headers);
        if let Ok(v) = HeaderValue::from_str(&admission.reset_secs().to_string()) {
            headers.insert(RETRY_AFTER, v);
        }
        return Ok(res.map_into_right_body());
    }

    let mut res = next.call(req).await?;
    limiter.write_headers(&admission, res.headers_mut());
    Ok(res.map_into_left_body())
}
