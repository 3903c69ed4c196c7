//! Integration tests for the outbox delivery worker: publish flow, retry
//! state, dead-letter routing, broker-outage recovery, and the circuit
//! breaker.

mod common;

use crate::common::fixtures::{create_account, transfer, unique_key};
use crate::common::TestHarness;
use paygate::domain::outbox::{EventEnvelope, OutboxRecord};
use paygate::kernel::engine::AuthorizeStatus;
use paygate::kernel::{Broker, OutboxWorker, OutboxWorkerConfig, Service};
use std::sync::Arc;
use std::time::Duration;
use test_context::test_context;
use tokio_util::sync::CancellationToken;

fn worker_with(ctx: &TestHarness, config: OutboxWorkerConfig) -> OutboxWorker {
    let broker: Arc<dyn Broker> = ctx.broker.clone();
    OutboxWorker::new(ctx.db_pool.clone(), broker, ctx.metrics.clone(), config)
}

fn small_batch_config() -> OutboxWorkerConfig {
    OutboxWorkerConfig {
        batch_size: 10,
        poll_interval: Duration::from_millis(20),
        max_retries: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        max_consecutive_failures: 3,
        topic_prefix: "payments".to_string(),
    }
}

async fn enqueue_event(ctx: &TestHarness, retry_count: i32) -> OutboxRecord {
    let mut record = OutboxRecord::new(
        "Payment",
        paygate::common::PaymentId::new().to_string(),
        "PaymentAuthorized",
        serde_json::json!({ "amount_cents": 1000, "currency": "USD" }),
    );
    record.retry_count = retry_count;
    record.insert(&ctx.db_pool).await.unwrap();
    record
}

async fn fetch_record(ctx: &TestHarness, id: paygate::common::EventId) -> OutboxRecord {
    sqlx::query_as::<_, OutboxRecord>(
        "SELECT id, aggregate_type, aggregate_id, event_type, payload, created_at, published_at, retry_count
         FROM outbox WHERE id = $1",
    )
    .bind(id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap()
}

// =============================================================================
// Publishing
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn publishes_enqueued_events_with_envelope_and_key(ctx: &TestHarness) {
    let record = enqueue_event(ctx, 0).await;

    let worker = worker_with(ctx, small_batch_config());
    let stats = worker.process_batch(&CancellationToken::new()).await.unwrap();
    assert!(stats.claimed >= 1);
    assert!(stats.published >= 1);

    let messages = ctx.broker.messages_for_topic("payments.paymentauthorized");
    let message = messages
        .iter()
        .find(|m| m.key == record.aggregate_id)
        .expect("event published to the derived topic");

    let envelope: EventEnvelope = ctx.broker.deserialize_message(message).unwrap();
    assert_eq!(envelope.event_id, record.id.to_string());
    assert_eq!(envelope.aggregate_type, "Payment");
    assert_eq!(envelope.aggregate_id, record.aggregate_id);
    assert_eq!(envelope.event_type, "PaymentAuthorized");
    assert_eq!(envelope.payload["amount_cents"], 1000);
    assert_eq!(envelope.timestamp, record.created_at.to_rfc3339());

    let stored = fetch_record(ctx, record.id).await;
    assert!(stored.published_at.is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn publish_failure_increments_retry_and_leaves_row_pending(ctx: &TestHarness) {
    let record = enqueue_event(ctx, 0).await;

    ctx.broker.set_failing(true);
    let worker = worker_with(ctx, small_batch_config());
    let stats = worker.process_batch(&CancellationToken::new()).await.unwrap();
    assert!(stats.claimed >= 1);
    assert_eq!(stats.published, 0);

    let stored = fetch_record(ctx, record.id).await;
    assert!(stored.published_at.is_none());
    assert_eq!(stored.retry_count, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn pending_depth_drains_after_broker_recovers(ctx: &TestHarness) {
    // Three committed authorizations while the broker is down.
    let payer = create_account(&ctx.db_pool, "USD", 100_000).await.unwrap();
    let payee = create_account(&ctx.db_pool, "USD", 0).await.unwrap();
    let mut aggregate_ids = Vec::new();
    for _ in 0..3 {
        let outcome = ctx
            .engine
            .authorize(&transfer(&unique_key("k-outage"), payer, payee, 1_000, "USD"))
            .await
            .unwrap();
        assert_eq!(outcome.status, AuthorizeStatus::Authorized);
        aggregate_ids.push(outcome.payment_id);
    }

    ctx.broker.set_failing(true);
    let worker = worker_with(ctx, small_batch_config());
    let shutdown = CancellationToken::new();
    worker.process_batch(&shutdown).await.unwrap();
    assert_eq!(ctx.broker.publish_count_for("payments.paymentauthorized"), 0);

    // Broker comes back; one poll cycle publishes everything.
    ctx.broker.set_failing(false);
    worker.process_batch(&shutdown).await.unwrap();

    let messages = ctx.broker.messages_for_topic("payments.paymentauthorized");
    for aggregate_id in &aggregate_ids {
        assert!(
            messages.iter().any(|m| &m.key == aggregate_id),
            "event for {aggregate_id} published after recovery"
        );
    }

    for aggregate_id in &aggregate_ids {
        let published: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox WHERE aggregate_id = $1 AND published_at IS NOT NULL",
        )
        .bind(aggregate_id)
        .fetch_one(&ctx.db_pool)
        .await
        .unwrap();
        assert_eq!(published, 1);
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn published_timestamp_is_never_overwritten(ctx: &TestHarness) {
    let record = enqueue_event(ctx, 0).await;

    let worker = worker_with(ctx, small_batch_config());
    worker.process_batch(&CancellationToken::new()).await.unwrap();

    let first = fetch_record(ctx, record.id).await;
    let published_at = first.published_at.unwrap();

    // A second mark is a no-op thanks to the NULL guard.
    let updated = OutboxRecord::mark_published(&[record.id], &ctx.db_pool).await.unwrap();
    assert_eq!(updated, 0);
    let second = fetch_record(ctx, record.id).await;
    assert_eq!(second.published_at.unwrap(), published_at);
}

// =============================================================================
// Dead-letter routing
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn retry_exhausted_events_go_to_the_dlq(ctx: &TestHarness) {
    let config = small_batch_config();
    let record = enqueue_event(ctx, config.max_retries).await;

    let worker = worker_with(ctx, config);
    let stats = worker.process_batch(&CancellationToken::new()).await.unwrap();
    assert!(stats.published >= 1);

    let messages = ctx.broker.messages_for_topic("payments.dlq");
    let message = messages
        .iter()
        .find(|m| m.key == record.aggregate_id)
        .expect("exhausted event routed to the DLQ");

    let value: serde_json::Value = ctx.broker.deserialize_message(message).unwrap();
    assert_eq!(value["event_id"], record.id.to_string());
    assert_eq!(value["retry_count"], record.retry_count);
    assert_eq!(value["error"], "max_retries_exceeded");
    assert!(value["failed_at"].is_string());

    // DLQ delivery is publication: the record is terminal.
    let stored = fetch_record(ctx, record.id).await;
    assert!(stored.published_at.is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failed_dlq_send_leaves_the_record_for_the_next_cycle(ctx: &TestHarness) {
    let config = small_batch_config();
    let record = enqueue_event(ctx, config.max_retries).await;

    ctx.broker.set_failing(true);
    let worker = worker_with(ctx, config);
    let shutdown = CancellationToken::new();
    worker.process_batch(&shutdown).await.unwrap();

    let stored = fetch_record(ctx, record.id).await;
    assert!(stored.published_at.is_none());

    // Next cycle, with the broker back, delivers it.
    ctx.broker.set_failing(false);
    worker.process_batch(&shutdown).await.unwrap();
    let stored = fetch_record(ctx, record.id).await;
    assert!(stored.published_at.is_some());
    assert_eq!(ctx.broker.publish_count_for("payments.dlq"), 1);
}

// =============================================================================
// Worker loop
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn circuit_breaker_stops_the_worker_after_consecutive_fruitless_cycles(
    ctx: &TestHarness,
) {
    enqueue_event(ctx, 0).await;
    ctx.broker.set_failing(true);

    let worker = worker_with(ctx, small_batch_config());
    let shutdown = CancellationToken::new();

    // With max_consecutive_failures = 3 and a 20ms poll interval the breaker
    // latches quickly; the run future must terminate on its own.
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        Box::new(worker).run(shutdown.clone()),
    )
    .await
    .expect("worker stopped via circuit breaker");
    assert!(result.is_ok());
    assert!(!shutdown.is_cancelled());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn worker_stops_on_shutdown_between_cycles(ctx: &TestHarness) {
    let worker = worker_with(ctx, small_batch_config());
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(Box::new(worker).run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker exits promptly on shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn worker_run_drains_committed_events_end_to_end(ctx: &TestHarness) {
    let payer = create_account(&ctx.db_pool, "USD", 50_000).await.unwrap();
    let payee = create_account(&ctx.db_pool, "USD", 0).await.unwrap();
    let outcome = ctx
        .engine
        .authorize(&transfer(&unique_key("k-e2e"), payer, payee, 2_500, "USD"))
        .await
        .unwrap();

    let worker = worker_with(ctx, small_batch_config());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(Box::new(worker).run(shutdown.clone()));

    // Wait for the poll loop to pick the event up.
    let mut delivered = false;
    for _ in 0..50 {
        if ctx
            .broker
            .messages_for_topic("payments.paymentauthorized")
            .iter()
            .any(|m| m.key == outcome.payment_id)
        {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    shutdown.cancel();
    let _ = handle.await;

    assert!(delivered, "committed event reaches the broker at least once");
}
