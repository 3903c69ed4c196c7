//! Transactional outbox records and the event envelope wire format.
//!
//! Rows are inserted inside the authorization transaction and relayed to the
//! broker by the outbox worker. A non-null `published_at` is final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;

use crate::common::EventId;

pub const AGGREGATE_PAYMENT: &str = "Payment";
pub const EVENT_PAYMENT_AUTHORIZED: &str = "PaymentAuthorized";
pub const EVENT_PAYMENT_DECLINED: &str = "PaymentDeclined";

#[derive(FromRow, Debug, Clone)]
pub struct OutboxRecord {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
}

impl OutboxRecord {
    pub fn new(
        aggregate_type: &str,
        aggregate_id: String,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            event_type: event_type.to_string(),
            payload,
            created_at: Utc::now(),
            published_at: None,
            retry_count: 0,
        }
    }

    pub async fn insert(&self, executor: impl PgExecutor<'_>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO outbox
                (id, aggregate_type, aggregate_id, event_type, payload,
                 created_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(self.id)
        .bind(&self.aggregate_type)
        .bind(&self.aggregate_id)
        .bind(&self.event_type)
        .bind(&self.payload)
        .bind(self.created_at)
        .bind(self.retry_count)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Claims up to `limit` unpublished rows, oldest first. Skips rows held
    /// by a concurrent worker so multiple workers never double-claim.
    pub async fn claim_unpublished(
        limit: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload,
                   created_at, published_at, retry_count
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY created_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Marks records published. The `published_at IS NULL` guard keeps an
    /// already-published timestamp from ever being overwritten.
    pub async fn mark_published(
        ids: &[EventId],
        executor: impl PgExecutor<'_>,
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET published_at = NOW()
            WHERE id = ANY($1) AND published_at IS NULL
            "#,
        )
        .bind(&ids)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn increment_retry(
        id: EventId,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE outbox SET retry_count = retry_count + 1 WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Current unpublished depth, fed into the pending-events gauge.
    pub async fn pending_count(executor: impl PgExecutor<'_>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE published_at IS NULL")
            .fetch_one(executor)
            .await
    }
}

/// The JSON shape consumers see on the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: String,
}

impl EventEnvelope {
    pub fn from_record(record: &OutboxRecord) -> Self {
        Self {
            event_id: record.id.to_string(),
            aggregate_type: record.aggregate_type.clone(),
            aggregate_id: record.aggregate_id.clone(),
            event_type: record.event_type.clone(),
            payload: record.payload.clone(),
            timestamp: record.created_at.to_rfc3339(),
        }
    }

    /// Wraps the envelope for the dead-letter topic, recording why delivery
    /// gave up.
    pub fn dead_letter(record: &OutboxRecord, failed_at: DateTime<Utc>) -> serde_json::Value {
        serde_json::json!({
            "event_id": record.id.to_string(),
            "aggregate_type": record.aggregate_type,
            "aggregate_id": record.aggregate_id,
            "event_type": record.event_type,
            "payload": record.payload,
            "timestamp": record.created_at.to_rfc3339(),
            "retry_count": record.retry_count,
            "failed_at": failed_at.to_rfc3339(),
            "error": "max_retries_exceeded",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> OutboxRecord {
        OutboxRecord::new(
            AGGREGATE_PAYMENT,
            "01JD0000000000000000000000".to_string(),
            EVENT_PAYMENT_AUTHORIZED,
            serde_json::json!({ "amount_cents": 5000 }),
        )
    }

    #[test]
    fn envelope_carries_record_fields() {
        let record = record();
        let envelope = EventEnvelope::from_record(&record);
        assert_eq!(envelope.event_id, record.id.to_string());
        assert_eq!(envelope.aggregate_type, "Payment");
        assert_eq!(envelope.event_type, "PaymentAuthorized");
        assert_eq!(envelope.payload["amount_cents"], 5000);
        assert!(envelope.timestamp.contains('T'));
    }

    #[test]
    fn dead_letter_wraps_envelope() {
        let mut record = record();
        record.retry_count = 5;
        let failed_at = Utc::now();
        let value = EventEnvelope::dead_letter(&record, failed_at);
        assert_eq!(value["retry_count"], 5);
        assert_eq!(value["error"], "max_retries_exceeded");
        assert_eq!(value["event_id"], record.id.to_string());
        assert_eq!(value["failed_at"], failed_at.to_rfc3339());
    }
}
