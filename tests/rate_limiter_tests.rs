//! Integration tests for the sliding-window rate limiter against Redis.

mod common;

use crate::common::fixtures::unique_key;
use crate::common::TestHarness;
use paygate::kernel::{RateLimiter, SlidingWindowLimiter};
use std::time::Duration;
use test_context::test_context;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

#[test_context(TestHarness)]
#[tokio::test]
async fn admits_at_most_the_limit_inside_one_window(ctx: &TestHarness) {
    let limiter = SlidingWindowLimiter::connect(&ctx.redis_url, 5, Duration::from_secs(60))
        .await
        .unwrap();
    let key = unique_key("limit");

    for i in 0..5 {
        let decision = limiter.check(&key).await;
        assert!(decision.allowed, "request {i} inside the limit is admitted");
        assert_eq!(decision.remaining, 5 - i - 1);
    }

    for _ in 0..3 {
        let decision = limiter.check(&key).await;
        assert!(!decision.allowed, "requests beyond the limit are rejected");
        assert_eq!(decision.remaining, 0);
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn window_slides_and_admits_again(ctx: &TestHarness) {
    let limiter = SlidingWindowLimiter::connect(&ctx.redis_url, 2, Duration::from_secs(1))
        .await
        .unwrap();
    let key = unique_key("slide");

    assert!(limiter.check(&key).await.allowed);
    assert!(limiter.check(&key).await.allowed);
    assert!(!limiter.check(&key).await.allowed);

    // Once the old events fall out of the window the key admits again.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(limiter.check(&key).await.allowed);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn keys_are_isolated_from_each_other(ctx: &TestHarness) {
    let limiter = SlidingWindowLimiter::connect(&ctx.redis_url, 1, Duration::from_secs(60))
        .await
        .unwrap();
    let first = unique_key("iso");
    let second = unique_key("iso");

    assert!(limiter.check(&first).await.allowed);
    assert!(!limiter.check(&first).await.allowed);
    assert!(limiter.check(&second).await.allowed, "other keys unaffected");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn same_millisecond_events_all_count(ctx: &TestHarness) {
    let limiter = SlidingWindowLimiter::connect(&ctx.redis_url, 3, Duration::from_secs(60))
        .await
        .unwrap();
    let key = unique_key("burst");

    // Fired back-to-back these often share a millisecond score; unique
    // members keep them from collapsing into one entry.
    let mut admitted = 0;
    for _ in 0..6 {
        if limiter.check(&key).await.allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 3);
}

#[tokio::test]
async fn fails_open_when_the_store_goes_away() {
    // Dedicated container so stopping it cannot disturb the shared one.
    let redis = Redis::default().start().await.unwrap();
    let host = redis.get_host().await.unwrap();
    let port = redis.get_host_port_ipv4(6379).await.unwrap();
    let limiter = SlidingWindowLimiter::connect(
        &format!("redis://{host}:{port}"),
        1,
        Duration::from_secs(60),
    )
    .await
    .unwrap();

    let key = format!("failopen-{}", ulid::Ulid::new());
    assert!(limiter.check(&key).await.allowed);
    assert!(!limiter.check(&key).await.allowed, "limit enforced while up");

    redis.stop().await.unwrap();

    // Store unreachable: admission degrades to allow.
    let decision = limiter.check(&key).await;
    assert!(decision.allowed, "limiter fails open when Redis is down");
}
