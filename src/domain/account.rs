//! Account and balance records.
//!
//! Accounts are created out-of-band and are read-only to this service;
//! balances are mutated only inside the authorization engine's transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;

use crate::common::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: String,
    pub currency: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub async fn find(
        id: AccountId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, owner_id, currency, status, created_at, updated_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Used by fixtures and seeding; the service itself never creates accounts.
    pub async fn insert(&self, executor: impl PgExecutor<'_>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, owner_id, currency, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(self.id)
        .bind(&self.owner_id)
        .bind(&self.currency)
        .bind(self.status)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }
}

/// One-to-one with [`Account`]; `version` is an optimistic counter that
/// strictly increases on every write.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub available_cents: i64,
    pub pending_cents: i64,
    pub currency: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    pub async fn find(
        account_id: AccountId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT account_id, available_cents, pending_cents, currency, version, updated_at
            FROM account_balances
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(executor)
        .await
    }

    /// Fetches the balance under a row lock. Callers must acquire locks in
    /// canonical order (smaller account id first) to stay deadlock-free.
    pub async fn find_for_update(
        account_id: AccountId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT account_id, available_cents, pending_cents, currency, version, updated_at
            FROM account_balances
            WHERE account_id = $1
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .fetch_optional(executor)
        .await
    }

    /// Optimistic write: bumps `version` and returns the affected-row count.
    /// Zero rows means the expected version no longer matches.
    pub async fn apply(
        account_id: AccountId,
        new_available_cents: i64,
        expected_version: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE account_balances
            SET available_cents = $1,
                version = version + 1,
                updated_at = NOW()
            WHERE account_id = $2 AND version = $3
            "#,
        )
        .bind(new_available_cents)
        .bind(account_id)
        .bind(expected_version)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert(&self, executor: impl PgExecutor<'_>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO account_balances
                (account_id, available_cents, pending_cents, currency, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(self.account_id)
        .bind(self.available_cents)
        .bind(self.pending_cents)
        .bind(&self.currency)
        .bind(self.version)
        .bind(self.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }
}
