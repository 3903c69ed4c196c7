//! Outbox delivery worker.
//!
//! Claims unpublished rows with `FOR UPDATE SKIP LOCKED`, publishes them to
//! the broker keyed by aggregate id, tracks per-event retry state, routes
//! retry-exhausted events to the dead-letter topic, and latches a circuit
//! breaker after too many fruitless cycles. Delivery is at-least-once: a
//! crash between broker ack and the database mark republishes next cycle.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rand::Rng;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::outbox::{EventEnvelope, OutboxRecord};
use crate::kernel::broker::Broker;
use crate::kernel::metrics::Metrics;
use crate::kernel::service_host::Service;

#[derive(Debug, Clone)]
pub struct OutboxWorkerConfig {
    /// Max rows claimed per cycle.
    pub batch_size: i64,
    /// Sleep between cycles that did not fill a batch.
    pub poll_interval: Duration,
    /// Retry threshold before a record is routed to the dead-letter topic.
    pub max_retries: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive fruitless cycles before the breaker latches.
    pub max_consecutive_failures: u32,
    pub topic_prefix: String,
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_consecutive_failures: 10,
            topic_prefix: "payments".to_string(),
        }
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    pub claimed: usize,
    pub published: usize,
}

pub struct OutboxWorker {
    pool: PgPool,
    broker: Arc<dyn Broker>,
    metrics: Arc<Metrics>,
    config: OutboxWorkerConfig,
}

impl OutboxWorker {
    pub fn new(
        pool: PgPool,
        broker: Arc<dyn Broker>,
        metrics: Arc<Metrics>,
        config: OutboxWorkerConfig,
    ) -> Self {
        Self {
            pool,
            broker,
            metrics,
            config,
        }
    }

    fn topic_for(&self, event_type: &str) -> String {
        format!("{}.{}", self.config.topic_prefix, event_type.to_lowercase())
    }

    fn dlq_topic(&self) -> String {
        format!("{}.dlq", self.config.topic_prefix)
    }

    /// Runs one claim-publish-mark cycle. Rows stay locked until the final
    /// commit, so a concurrent worker skips them. The shutdown token is
    /// honoured between per-record sends, never mid-transaction.
    pub async fn process_batch(&self, shutdown: &CancellationToken) -> Result<CycleStats> {
        let mut tx = self.pool.begin().await?;
        let records = OutboxRecord::claim_unpublished(self.config.batch_size, &mut *tx).await?;
        if records.is_empty() {
            tx.commit().await?;
            self.refresh_pending_gauge().await;
            return Ok(CycleStats::default());
        }

        let mut published_ids = Vec::new();
        let mut published = 0usize;

        for record in &records {
            if shutdown.is_cancelled() {
                break;
            }

            if record.retry_count >= self.config.max_retries {
                if self.send_to_dlq(record).await {
                    published_ids.push(record.id);
                    published += 1;
                }
                continue;
            }

            let envelope = EventEnvelope::from_record(record);
            let payload = Bytes::from(serde_json::to_vec(&envelope)?);
            let topic = self.topic_for(&record.event_type);

            match self
                .broker
                .publish(&topic, &record.aggregate_id, payload)
                .await
            {
                Ok(()) => {
                    info!(
                        event_id = %record.id,
                        topic = %topic,
                        aggregate_id = %record.aggregate_id,
                        event_type = %record.event_type,
                        "event_published"
                    );
                    self.metrics
                        .outbox_events_published_total
                        .with_label_values(&[&record.event_type])
                        .inc();
                    published_ids.push(record.id);
                    published += 1;
                }
                Err(error) => {
                    OutboxRecord::increment_retry(record.id, &mut *tx).await?;
                    self.metrics
                        .outbox_events_failed_total
                        .with_label_values(&[&record.event_type])
                        .inc();
                    // Advisory: actual pacing is bounded by the poll cadence.
                    let delay = backoff_delay(&self.config, record.retry_count);
                    warn!(
                        event_id = %record.id,
                        topic = %topic,
                        error = %error,
                        retry_count = record.retry_count + 1,
                        next_delay_ms = delay.as_millis() as u64,
                        "event_retry_scheduled"
                    );
                }
            }
        }

        OutboxRecord::mark_published(&published_ids, &mut *tx).await?;
        tx.commit().await?;

        if !published_ids.is_empty() {
            debug!(count = published_ids.len(), "batch_published");
        }
        self.refresh_pending_gauge().await;

        Ok(CycleStats {
            claimed: records.len(),
            published,
        })
    }

    /// Wraps a retry-exhausted record and sends it to the dead-letter topic.
    /// DLQ delivery is itself publication: success marks the row published;
    /// failure leaves it for the next cycle.
    async fn send_to_dlq(&self, record: &OutboxRecord) -> bool {
        let payload = EventEnvelope::dead_letter(record, Utc::now());
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => Bytes::from(bytes),
            Err(error) => {
                error!(event_id = %record.id, error = %error, "dlq_encoding_failed");
                return false;
            }
        };
        match self
            .broker
            .publish(&self.dlq_topic(), &record.aggregate_id, bytes)
            .await
        {
            Ok(()) => {
                warn!(
                    event_id = %record.id,
                    aggregate_id = %record.aggregate_id,
                    retry_count = record.retry_count,
                    "event_sent_to_dlq"
                );
                self.metrics
                    .outbox_events_dead_lettered_total
                    .with_label_values(&[&record.event_type])
                    .inc();
                true
            }
            Err(error) => {
                error!(event_id = %record.id, error = %error, "dlq_publish_failed");
                false
            }
        }
    }

    async fn refresh_pending_gauge(&self) {
        match OutboxRecord::pending_count(&self.pool).await {
            Ok(pending) => self.metrics.outbox_pending_events.set(pending),
            Err(error) => debug!(error = %error, "outbox_pending_count_failed"),
        }
    }
}

#[async_trait]
impl Service for OutboxWorker {
    fn name(&self) -> &'static str {
        "outbox-worker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_retries = self.config.max_retries,
            "outbox_worker_started"
        );

        let mut consecutive_failures = 0u32;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.process_batch(&shutdown).await {
                Ok(stats) => {
                    if stats.claimed > 0 && stats.published == 0 {
                        consecutive_failures += 1;
                    } else {
                        consecutive_failures = 0;
                    }
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        error!(
                            consecutive_failures,
                            action = "stopping_worker",
                            "circuit_breaker_triggered"
                        );
                        break;
                    }
                    // A full batch means more rows are likely waiting.
                    if stats.claimed as i64 >= self.config.batch_size {
                        continue;
                    }
                }
                Err(error) => {
                    consecutive_failures += 1;
                    error!(
                        error = %error,
                        consecutive_failures,
                        "outbox_processing_error"
                    );
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        error!(
                            consecutive_failures,
                            action = "stopping_worker",
                            "circuit_breaker_triggered"
                        );
                        break;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("outbox_worker_stopped");
        Ok(())
    }
}

/// `min(base * 2^retries, max)` plus up to 10% uniform jitter.
pub fn backoff_delay(config: &OutboxWorkerConfig, retry_count: i32) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let max_ms = config.max_delay.as_millis() as u64;
    let factor = 2u64.saturating_pow(retry_count.max(0) as u32);
    let delay_ms = base_ms.saturating_mul(factor).min(max_ms);
    let jitter_ms = rand::thread_rng().gen_range(0..=delay_ms / 10);
    Duration::from_millis(delay_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = OutboxWorkerConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };

        for (retries, expected_ms) in [(0, 1_000), (1, 2_000), (3, 8_000), (10, 60_000)] {
            let delay = backoff_delay(&config, retries).as_millis() as u64;
            assert!(
                delay >= expected_ms && delay <= expected_ms + expected_ms / 10,
                "retry {retries}: got {delay}ms, expected {expected_ms}ms + <=10% jitter"
            );
        }
    }

    #[test]
    fn backoff_survives_huge_retry_counts() {
        let config = OutboxWorkerConfig::default();
        let delay = backoff_delay(&config, i32::MAX);
        assert!(delay <= config.max_delay + config.max_delay / 10);
    }

    #[test]
    fn topics_derive_from_event_type() {
        let config = OutboxWorkerConfig::default();
        assert_eq!(config.topic_prefix, "payments");
        // Topic shape asserted through a worker in the integration suite;
        // here just the config defaults.
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_consecutive_failures, 10);
    }
}
