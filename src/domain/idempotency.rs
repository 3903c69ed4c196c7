//! Idempotency records.
//!
//! State machine: absent → PENDING → {COMPLETED, FAILED}. An expired row in
//! any terminal state is equivalent to absent for a new attempt and is
//! reclaimed in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;

use crate::common::PaymentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "idempotency_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(FromRow, Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub payment_id: Option<PaymentId>,
    pub response_data: Option<serde_json::Value>,
    pub status: IdempotencyStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Claims the key with insert-if-absent semantics. Returns `true` when
    /// this call inserted the PENDING row, `false` when the key already
    /// exists (expired or not).
    pub async fn try_insert_pending(
        key: &str,
        expires_at: DateTime<Utc>,
        executor: impl PgExecutor<'_>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, status, created_at, expires_at)
            VALUES ($1, 'PENDING', NOW(), $2)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Fetches the record regardless of expiry; callers decide how to treat
    /// an expired row.
    pub async fn find(
        key: &str,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT key, payment_id, response_data, status, created_at, expires_at
            FROM idempotency_keys
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(executor)
        .await
    }

    /// Reclaims an expired row in place, returning it to PENDING for a new
    /// attempt. The expiry guard keeps a concurrent live row untouched.
    pub async fn reset_expired(
        key: &str,
        expires_at: DateTime<Utc>,
        executor: impl PgExecutor<'_>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET status = 'PENDING',
                payment_id = NULL,
                response_data = NULL,
                created_at = NOW(),
                expires_at = $2
            WHERE key = $1 AND expires_at <= NOW()
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_completed(
        key: &str,
        payment_id: PaymentId,
        response_data: serde_json::Value,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET status = 'COMPLETED',
                payment_id = $2,
                response_data = $3
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(payment_id)
        .bind(response_data)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        key: &str,
        payment_id: Option<PaymentId>,
        response_data: serde_json::Value,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET status = 'FAILED',
                payment_id = $2,
                response_data = $3
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(payment_id)
        .bind(response_data)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Retention sweep; returns the number of rows removed.
    pub async fn delete_expired(executor: impl PgExecutor<'_>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < NOW()")
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
