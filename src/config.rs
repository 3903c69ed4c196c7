use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
///
/// Required: `DATABASE_URL`. Everything else has a development-friendly
/// default. No global settings object; this flows into constructors.
#[derive(Debug, Clone)]
pub struct Config {
    pub grpc_port: u16,
    pub metrics_port: u16,
    pub metrics_host: String,
    pub database_url: String,
    pub redis_url: String,
    pub broker_addrs: String,
    pub topic_prefix: String,
    pub outbox_batch_size: i64,
    pub outbox_poll_interval: Duration,
    pub outbox_max_retries: i32,
    pub outbox_base_delay: Duration,
    pub outbox_max_delay: Duration,
    pub rate_limit_enabled: bool,
    pub rate_limit_max_requests: i64,
    pub rate_limit_window: Duration,
    pub idempotency_ttl: Duration,
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first
    /// when present (development).
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            grpc_port: parse_or("GRPC_PORT", 50051)?,
            metrics_port: parse_or("METRICS_PORT", 9090)?,
            metrics_host: env::var("METRICS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            broker_addrs: env::var("BROKER_ADDRS")
                .unwrap_or_else(|_| "localhost:4222".to_string()),
            topic_prefix: env::var("TOPIC_PREFIX").unwrap_or_else(|_| "payments".to_string()),
            outbox_batch_size: parse_or("OUTBOX_BATCH_SIZE", 100)?,
            outbox_poll_interval: Duration::from_millis(parse_or(
                "OUTBOX_POLL_INTERVAL_MS",
                1_000,
            )?),
            outbox_max_retries: parse_or("OUTBOX_MAX_RETRIES", 5)?,
            outbox_base_delay: Duration::from_millis(parse_or("OUTBOX_BASE_DELAY_MS", 1_000)?),
            outbox_max_delay: Duration::from_millis(parse_or("OUTBOX_MAX_DELAY_MS", 60_000)?),
            rate_limit_enabled: parse_or("RATE_LIMIT_ENABLED", true)?,
            rate_limit_max_requests: parse_or("RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_window: Duration::from_secs(parse_or("RATE_LIMIT_WINDOW_SECONDS", 60)?),
            idempotency_ttl: Duration::from_secs(
                parse_or::<u64>("IDEMPOTENCY_TTL_HOURS", 24)? * 3600,
            ),
            shutdown_grace: Duration::from_secs(parse_or("SHUTDOWN_GRACE_SECONDS", 10)?),
        })
    }
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{name} has an invalid value: {value}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        env::set_var("DATABASE_URL", "postgresql://localhost/paygate_test");
        let config = Config::from_env().unwrap();

        assert_eq!(config.grpc_port, 50051);
        assert_eq!(config.metrics_host, "127.0.0.1");
        assert_eq!(config.topic_prefix, "payments");
        assert_eq!(config.outbox_batch_size, 100);
        assert_eq!(config.outbox_poll_interval, Duration::from_secs(1));
        assert_eq!(config.outbox_max_retries, 5);
        assert_eq!(config.outbox_base_delay, Duration::from_secs(1));
        assert_eq!(config.outbox_max_delay, Duration::from_secs(60));
        assert_eq!(config.rate_limit_max_requests, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.idempotency_ttl, Duration::from_secs(24 * 3600));
        assert!(config.outbox_base_delay <= config.outbox_max_delay);
    }
}
