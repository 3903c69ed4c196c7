//! Payment record and the domain decline codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use std::fmt;

use crate::common::{AccountId, PaymentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Authorized,
    Declined,
}

/// Reason an authorization was declined. Declines are committed outcomes,
/// not errors: the code is persisted on the payment row and echoed in the
/// `PaymentDeclined` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeclineCode {
    InsufficientFunds,
    AccountNotFound,
    InvalidAmount,
    SameAccount,
    CurrencyMismatch,
}

impl DeclineCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclineCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            DeclineCode::AccountNotFound => "ACCOUNT_NOT_FOUND",
            DeclineCode::InvalidAmount => "INVALID_AMOUNT",
            DeclineCode::SameAccount => "SAME_ACCOUNT",
            DeclineCode::CurrencyMismatch => "CURRENCY_MISMATCH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSUFFICIENT_FUNDS" => Some(DeclineCode::InsufficientFunds),
            "ACCOUNT_NOT_FOUND" => Some(DeclineCode::AccountNotFound),
            "INVALID_AMOUNT" => Some(DeclineCode::InvalidAmount),
            "SAME_ACCOUNT" => Some(DeclineCode::SameAccount),
            "CURRENCY_MISMATCH" => Some(DeclineCode::CurrencyMismatch),
            _ => None,
        }
    }
}

impl fmt::Display for DeclineCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub idempotency_key: String,
    pub payer_account_id: AccountId,
    pub payee_account_id: AccountId,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub description: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A freshly authorized payment, not yet persisted.
    pub fn authorized(
        idempotency_key: String,
        payer_account_id: AccountId,
        payee_account_id: AccountId,
        amount_cents: i64,
        currency: String,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            idempotency_key,
            payer_account_id,
            payee_account_id,
            amount_cents,
            currency,
            status: PaymentStatus::Authorized,
            description,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A declined payment carrying its decline code and message.
    pub fn declined(
        idempotency_key: String,
        payer_account_id: AccountId,
        payee_account_id: AccountId,
        amount_cents: i64,
        currency: String,
        description: Option<String>,
        code: DeclineCode,
        message: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            idempotency_key,
            payer_account_id,
            payee_account_id,
            amount_cents,
            currency,
            status: PaymentStatus::Declined,
            description,
            error_code: Some(code.as_str().to_string()),
            error_message: Some(message),
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn insert(&self, executor: impl PgExecutor<'_>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, idempotency_key, payer_account_id, payee_account_id,
                 amount_cents, currency, status, description,
                 error_code, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(self.id)
        .bind(&self.idempotency_key)
        .bind(self.payer_account_id)
        .bind(self.payee_account_id)
        .bind(self.amount_cents)
        .bind(&self.currency)
        .bind(self.status)
        .bind(&self.description)
        .bind(&self.error_code)
        .bind(&self.error_message)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find(
        id: PaymentId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, idempotency_key, payer_account_id, payee_account_id,
                   amount_cents, currency, status, description,
                   error_code, error_message, created_at, updated_at
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_idempotency_key(
        key: &str,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, idempotency_key, payer_account_id, payee_account_id,
                   amount_cents, currency, status, description,
                   error_code, error_message, created_at, updated_at
            FROM payments
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(executor)
        .await
    }
}
