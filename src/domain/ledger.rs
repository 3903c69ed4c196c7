//! Double-entry ledger records. Written in the same transaction as their
//! payment; never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;

use crate::common::{AccountId, LedgerEntryId, PaymentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_type", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    Debit,
    Credit,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub payment_id: PaymentId,
    pub account_id: AccountId,
    pub entry_type: EntryType,
    pub amount_cents: i64,
    pub currency: String,
    pub balance_after_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        payment_id: PaymentId,
        account_id: AccountId,
        entry_type: EntryType,
        amount_cents: i64,
        currency: String,
        balance_after_cents: i64,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            payment_id,
            account_id,
            entry_type,
            amount_cents,
            currency,
            balance_after_cents,
            created_at: Utc::now(),
        }
    }

    pub async fn insert(&self, executor: impl PgExecutor<'_>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries
                (id, payment_id, account_id, entry_type, amount_cents,
                 currency, balance_after_cents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(self.id)
        .bind(self.payment_id)
        .bind(self.account_id)
        .bind(self.entry_type)
        .bind(self.amount_cents)
        .bind(&self.currency)
        .bind(self.balance_after_cents)
        .bind(self.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Entries for a payment in insertion order (the debit is written first).
    pub async fn find_by_payment(
        payment_id: PaymentId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, payment_id, account_id, entry_type, amount_cents,
                   currency, balance_after_cents, created_at
            FROM ledger_entries
            WHERE payment_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(payment_id)
        .fetch_all(executor)
        .await
    }

    /// Most recent entries for an account, newest first.
    pub async fn find_by_account(
        account_id: AccountId,
        limit: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, payment_id, account_id, entry_type, amount_cents,
                   currency, balance_after_cents, created_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(executor)
        .await
    }
}
