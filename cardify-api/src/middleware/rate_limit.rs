/// Per-caller rate limiting
///
/// Token bucket per caller, held in process memory. Authenticated callers
/// are keyed by user id, anonymous ones by client address. The address comes
/// from `X-Forwarded-For` only when the peer is listed in `TRUSTED_PROXIES`.
///
/// # Algorithm
///
/// - Each bucket holds up to `requests_per_minute` tokens
/// - Tokens refill continuously at `requests_per_minute / 60` per second
/// - Each request consumes 1 token; an empty bucket answers 429
///
/// # Headers
///
/// - `X-RateLimit-Limit`: bucket capacity
/// - `X-RateLimit-Remaining`: whole tokens left
/// - `Retry-After`: seconds to wait (429 responses only)

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use cardify_shared::auth::middleware::authenticate;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Buckets idle this long are forgotten during pruning
const IDLE_BUCKET_TTL: Duration = Duration::from_secs(600);

/// Pruning runs once the map grows past this
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, now: Instant) -> Self {
        TokenBucket {
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, rate: f64, capacity: u32, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity as f64);
        self.last_refill = now;
    }

    fn try_consume(&mut self, count: f64) -> bool {
        if self.tokens >= count {
            self.tokens -= count;
            true
        } else {
            false
        }
    }

    fn seconds_until_available(&self, count: f64, rate: f64) -> u64 {
        let deficit = count - self.tokens;
        if deficit <= 0.0 {
            0
        } else {
            (deficit / rate).ceil() as u64
        }
    }
}

/// Outcome of one rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: u64 },
}

pub struct RateLimiter {
    capacity: u32,
    refill_rate: f64,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1);
        Self {
            capacity,
            refill_rate: capacity as f64 / 60.0,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Consumes one token for `key`
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if buckets.len() > PRUNE_THRESHOLD {
            buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) < IDLE_BUCKET_TTL);
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity, now));
        bucket.refill(self.refill_rate, self.capacity, now);

        if bucket.try_consume(1.0) {
            RateDecision::Allowed {
                remaining: bucket.tokens.floor() as u32,
            }
        } else {
            RateDecision::Limited {
                retry_after: bucket.seconds_until_available(1.0, self.refill_rate).max(1),
            }
        }
    }
}

/// Identifies the caller: user id if the token checks out, else address
///
/// `X-Forwarded-For` only counts when the peer is a trusted proxy.
fn caller_key(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
    secret: &str,
) -> String {
    if let Ok(auth) = authenticate(headers, secret) {
        return format!("user:{}", auth.user_id);
    }

    let peer_ip = peer.map(|addr| addr.ip());
    let via_proxy = peer_ip.map_or(false, |ip| trusted_proxies.contains(&ip));

    let forwarded = headers
        .get("x-forwarded-for")
        .filter(|_| via_proxy)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer_ip) {
        (Some(ip), _) => format!("ip:{}", ip),
        (None, Some(ip)) => format!("ip:{}", ip),
        (None, None) => "ip:unknown".to_string(),
    }
}

/// Rate limiting middleware layer
///
/// # Errors
///
/// - 429 Too Many Requests with `Retry-After` when the bucket is empty
pub async fn rate_limit_layer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = caller_key(
        request.headers(),
        peer,
        &state.config.api.trusted_proxies,
        state.jwt_secret(),
    );

    let remaining = match state.rate_limiter.check(&key) {
        RateDecision::Allowed { remaining } => remaining,
        RateDecision::Limited { retry_after } => {
            tracing::warn!(caller = %key, retry_after, "Rate limit exceeded");
            return Err(ApiError::RateLimitExceeded {
                retry_after,
                message: format!("Rate limit exceeded. Try again in {} seconds", retry_after),
            });
        }
    };

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(state.rate_limiter.capacity()));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));

    Ok(response)
}
