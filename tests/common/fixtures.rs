//! Test fixtures, created through the domain records.

use anyhow::Result;
use chrono::Utc;
use paygate::common::AccountId;
use paygate::domain::account::{Account, AccountBalance, AccountStatus};
use paygate::kernel::engine::AuthorizeCommand;
use sqlx::PgPool;
use ulid::Ulid;

/// Creates an ACTIVE account with a balance row.
pub async fn create_account(
    pool: &PgPool,
    currency: &str,
    available_cents: i64,
) -> Result<AccountId> {
    create_account_with_status(pool, currency, available_cents, AccountStatus::Active).await
}

pub async fn create_account_with_status(
    pool: &PgPool,
    currency: &str,
    available_cents: i64,
    status: AccountStatus,
) -> Result<AccountId> {
    let now = Utc::now();
    let account = Account {
        id: AccountId::new(),
        owner_id: format!("owner-{}", Ulid::new()),
        currency: currency.to_string(),
        status,
        created_at: now,
        updated_at: now,
    };
    account.insert(pool).await?;

    AccountBalance {
        account_id: account.id,
        available_cents,
        pending_cents: 0,
        currency: currency.to_string(),
        version: 1,
        updated_at: now,
    }
    .insert(pool)
    .await?;

    Ok(account.id)
}

/// A unique idempotency key so tests on the shared database never collide.
pub fn unique_key(prefix: &str) -> String {
    format!("{prefix}-{}", Ulid::new())
}

pub fn transfer(
    key: &str,
    payer: AccountId,
    payee: AccountId,
    amount_cents: i64,
    currency: &str,
) -> AuthorizeCommand {
    AuthorizeCommand {
        idempotency_key: key.to_string(),
        payer_account_id: payer.to_string(),
        payee_account_id: payee.to_string(),
        amount_cents,
        currency: currency.to_string(),
        description: None,
    }
}
