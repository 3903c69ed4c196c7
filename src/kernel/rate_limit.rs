//! Sliding-window rate limiting against Redis.
//!
//! Each key maps to a sorted set of arrival timestamps. One atomic pipeline
//! trims events older than the window, counts what remains, inserts the
//! current event and refreshes the key TTL. A check-then-insert two-step
//! would race under concurrency, so everything runs as MULTI/EXEC.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::warn;
use ulid::Ulid;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
}

/// Admission decisions keyed by caller identity.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, key: &str) -> RateLimitDecision;
}

pub struct SlidingWindowLimiter {
    conn: redis::aio::ConnectionManager,
    max_requests: i64,
    window: Duration,
    key_prefix: String,
}

impl SlidingWindowLimiter {
    pub fn new(conn: redis::aio::ConnectionManager, max_requests: i64, window: Duration) -> Self {
        Self {
            conn,
            max_requests,
            window,
            key_prefix: "ratelimit:".to_string(),
        }
    }

    pub async fn connect(
        url: &str,
        max_requests: i64,
        window: Duration,
    ) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, max_requests, window))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    async fn try_check(&self, key: &str) -> redis::RedisResult<RateLimitDecision> {
        let redis_key = format!("{}{}", self.key_prefix, key);
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = self.window.as_millis() as i64;
        // Unique member so two events landing on the same millisecond both
        // count.
        let member = Ulid::new().to_string();

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&redis_key)
            .arg(0)
            .arg(now_ms - window_ms)
            .cmd("ZCARD")
            .arg(&redis_key)
            .cmd("ZADD")
            .arg(&redis_key)
            .arg(now_ms)
            .arg(&member)
            .cmd("EXPIRE")
            .arg(&redis_key)
            .arg(self.window.as_secs() as i64);
        let (_trimmed, count, _added, _expire): (i64, i64, i64, i64) =
            pipe.query_async(&mut conn).await?;

        Ok(RateLimitDecision {
            allowed: count < self.max_requests,
            remaining: (self.max_requests - count - 1).max(0),
        })
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check(&self, key: &str) -> RateLimitDecision {
        match self.try_check(key).await {
            Ok(decision) => {
                if !decision.allowed {
                    warn!(
                        identifier = key,
                        max_requests = self.max_requests,
                        "rate_limit_exceeded"
                    );
                }
                decision
            }
            // Rate limiting is an admission optimisation, not a correctness
            // boundary: an unreachable store fails open.
            Err(error) => {
                warn!(identifier = key, error = %error, "rate_limit_store_unavailable");
                RateLimitDecision {
                    allowed: true,
                    remaining: self.max_requests,
                }
            }
        }
    }
}

/// Limiter that admits everything; used when rate limiting is disabled and
/// in tests that exercise other paths.
#[derive(Default)]
pub struct AllowAllLimiter;

#[async_trait]
impl RateLimiter for AllowAllLimiter {
    async fn check(&self, _key: &str) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            remaining: i64::MAX,
        }
    }
}
