//! The authorization engine.
//!
//! `authorize` runs the whole decision as a single Postgres transaction:
//! idempotency claim, domain validation, balance locking in canonical order,
//! double-entry ledger posting, optimistic balance updates, outbox enqueue,
//! and the idempotency terminal transition. Domain declines are committed
//! outcomes; only infrastructure failures roll back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::common::{AccountId, PaymentId};
use crate::domain::account::{Account, AccountBalance, AccountStatus};
use crate::domain::idempotency::{IdempotencyRecord, IdempotencyStatus};
use crate::domain::ledger::{EntryType, LedgerEntry};
use crate::domain::outbox::{
    OutboxRecord, AGGREGATE_PAYMENT, EVENT_PAYMENT_AUTHORIZED, EVENT_PAYMENT_DECLINED,
};
use crate::domain::payment::{DeclineCode, Payment};

const MAX_DESCRIPTION_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct AuthorizeCommand {
    pub idempotency_key: String,
    pub payer_account_id: String,
    pub payee_account_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthorizeStatus {
    Authorized,
    Declined,
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeError {
    pub code: DeclineCode,
    pub message: String,
}

/// The engine's result for a command. Serialized verbatim as the idempotency
/// response snapshot, so replays reproduce the original answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeOutcome {
    pub payment_id: String,
    pub status: AuthorizeStatus,
    pub error: Option<AuthorizeError>,
    pub processed_at: DateTime<Utc>,
}

/// Failures the engine surfaces to the transport. Domain declines are not
/// here: they are committed outcomes inside [`AuthorizeOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Caller fault, rejected before any storage work.
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("description exceeds {MAX_DESCRIPTION_BYTES} bytes")]
    DescriptionTooLong,

    /// Another request holds a PENDING claim on the same idempotency key.
    /// The caller retries; it never blocks behind the in-flight attempt.
    #[error("a request with this idempotency key is already in flight")]
    RequestInFlight,

    /// An optimistic balance update matched zero rows; the transaction was
    /// rolled back and the caller may retry with the same key.
    #[error("balance version conflict for account {0}")]
    VersionConflict(String),

    /// A balance row is missing for an existing account.
    #[error("balance row missing for account {0}")]
    BalanceMissing(String),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error("response snapshot encoding failed")]
    Snapshot(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the caller should treat this as an invalid request rather
    /// than a transient fault.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            EngineError::MissingField(_) | EngineError::DescriptionTooLong
        )
    }
}

/// Outcome of the in-transaction domain validations. A decline carries the
/// accounts loaded so far so the decline path can persist a payment row
/// without re-reading what is already known.
enum Validated {
    Pass {
        payer: Account,
        payee: Account,
    },
    Decline {
        code: DeclineCode,
        message: String,
        payer: Option<Account>,
        payee: Option<Account>,
    },
}

pub struct PaymentEngine {
    pool: PgPool,
    idempotency_ttl: Duration,
}

impl PaymentEngine {
    pub fn new(pool: PgPool, idempotency_ttl: std::time::Duration) -> Self {
        Self {
            pool,
            idempotency_ttl: Duration::from_std(idempotency_ttl)
                .unwrap_or_else(|_| Duration::hours(24)),
        }
    }

    pub async fn authorize(&self, cmd: &AuthorizeCommand) -> Result<AuthorizeOutcome, EngineError> {
        require_non_empty(&cmd.idempotency_key, "idempotency_key")?;
        require_non_empty(&cmd.payer_account_id, "payer_account_id")?;
        require_non_empty(&cmd.payee_account_id, "payee_account_id")?;
        require_non_empty(&cmd.currency, "currency")?;
        if let Some(description) = &cmd.description {
            if description.len() > MAX_DESCRIPTION_BYTES {
                return Err(EngineError::DescriptionTooLong);
            }
        }

        let mut tx = self.pool.begin().await?;
        let expires_at = Utc::now() + self.idempotency_ttl;

        let claimed =
            IdempotencyRecord::try_insert_pending(&cmd.idempotency_key, expires_at, &mut *tx)
                .await?;
        if !claimed {
            let existing = IdempotencyRecord::find(&cmd.idempotency_key, &mut *tx).await?;
            match existing {
                // The row vanished between the conflicting insert and this
                // read; another attempt is racing us.
                None => return Err(EngineError::RequestInFlight),
                Some(record) if record.is_expired() => {
                    let reclaimed = IdempotencyRecord::reset_expired(
                        &cmd.idempotency_key,
                        expires_at,
                        &mut *tx,
                    )
                    .await?;
                    if reclaimed == 0 {
                        return Err(EngineError::RequestInFlight);
                    }
                    // Reclaimed in place; fall through and process as new.
                }
                Some(record) => return replay(&cmd.idempotency_key, record),
            }
        }

        match self.validate(&mut tx, cmd).await? {
            Validated::Decline {
                code,
                message,
                payer,
                payee,
            } => self.commit_decline(tx, cmd, code, message, payer, payee).await,
            Validated::Pass { payer, payee } => self.commit_transfer(tx, cmd, payer, payee).await,
        }
    }

    /// Domain validations 1-6, in order, on plain reads. The first failure
    /// fixes the decline code.
    async fn validate(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        cmd: &AuthorizeCommand,
    ) -> Result<Validated, EngineError> {
        if cmd.amount_cents <= 0 {
            return Ok(Validated::Decline {
                code: DeclineCode::InvalidAmount,
                message: "Amount must be positive".to_string(),
                payer: None,
                payee: None,
            });
        }

        if cmd.payer_account_id == cmd.payee_account_id {
            return Ok(Validated::Decline {
                code: DeclineCode::SameAccount,
                message: "Cannot transfer to same account".to_string(),
                payer: None,
                payee: None,
            });
        }

        let payer = match find_active_account(&cmd.payer_account_id, &mut **tx).await? {
            Found::Active(account) => account,
            other => {
                return Ok(Validated::Decline {
                    code: DeclineCode::AccountNotFound,
                    message: format!("Payer account {} not found", cmd.payer_account_id),
                    payer: other.into_account(),
                    payee: None,
                });
            }
        };

        let payee = match find_active_account(&cmd.payee_account_id, &mut **tx).await? {
            Found::Active(account) => account,
            other => {
                return Ok(Validated::Decline {
                    code: DeclineCode::AccountNotFound,
                    message: format!("Payee account {} not found", cmd.payee_account_id),
                    payer: Some(payer),
                    payee: other.into_account(),
                });
            }
        };

        // Distinct request strings can still name one account (ULID parsing
        // is case-insensitive), so compare the parsed ids too.
        if payer.id == payee.id {
            return Ok(Validated::Decline {
                code: DeclineCode::SameAccount,
                message: "Cannot transfer to same account".to_string(),
                payer: Some(payer),
                payee: None,
            });
        }

        if !is_valid_currency(&cmd.currency)
            || payer.currency != cmd.currency
            || payee.currency != cmd.currency
        {
            return Ok(Validated::Decline {
                code: DeclineCode::CurrencyMismatch,
                message: format!(
                    "Currency {} does not match both accounts",
                    cmd.currency
                ),
                payer: Some(payer),
                payee: Some(payee),
            });
        }

        let balance = AccountBalance::find(payer.id, &mut **tx).await?;
        let available = balance.as_ref().map(|b| b.available_cents).unwrap_or(0);
        if available < cmd.amount_cents {
            info!(
                payer = %cmd.payer_account_id,
                available,
                required = cmd.amount_cents,
                reason = "INSUFFICIENT_FUNDS",
                "payment_declined"
            );
            return Ok(Validated::Decline {
                code: DeclineCode::InsufficientFunds,
                message: "Insufficient funds".to_string(),
                payer: Some(payer),
                payee: Some(payee),
            });
        }

        Ok(Validated::Pass { payer, payee })
    }

    /// Happy path: lock balances in canonical order, re-check funds, post
    /// the double entry, bump balance versions, enqueue the event, finish
    /// the idempotency record, commit.
    async fn commit_transfer(
        &self,
        mut tx: Transaction<'_, Postgres>,
        cmd: &AuthorizeCommand,
        payer: Account,
        payee: Account,
    ) -> Result<AuthorizeOutcome, EngineError> {
        // Deterministic lock order prevents ABBA deadlocks between
        // concurrent transfers over the same account pair.
        let lock_order = if payer.id <= payee.id {
            [payer.id, payee.id]
        } else {
            [payee.id, payer.id]
        };
        let mut locked = Vec::with_capacity(2);
        for account_id in lock_order {
            let balance = AccountBalance::find_for_update(account_id, &mut *tx)
                .await?
                .ok_or_else(|| EngineError::BalanceMissing(account_id.to_string()))?;
            locked.push(balance);
        }
        let (payer_balance, payee_balance) = if locked[0].account_id == payer.id {
            (locked.remove(0), locked.remove(0))
        } else {
            let payee_balance = locked.remove(0);
            (locked.remove(0), payee_balance)
        };

        // The funds check must run again under the lock; the plain-read
        // check races with concurrent authorizations.
        if payer_balance.available_cents < cmd.amount_cents {
            info!(
                payer = %payer.id,
                available = payer_balance.available_cents,
                required = cmd.amount_cents,
                reason = "INSUFFICIENT_FUNDS",
                "payment_declined_under_lock"
            );
            return self
                .commit_decline(
                    tx,
                    cmd,
                    DeclineCode::InsufficientFunds,
                    "Insufficient funds".to_string(),
                    Some(payer),
                    Some(payee),
                )
                .await;
        }

        let payer_new = payer_balance.available_cents - cmd.amount_cents;
        let payee_new = payee_balance.available_cents + cmd.amount_cents;

        let payment = Payment::authorized(
            cmd.idempotency_key.clone(),
            payer.id,
            payee.id,
            cmd.amount_cents,
            cmd.currency.clone(),
            cmd.description.clone(),
        );
        payment.insert(&mut *tx).await?;

        LedgerEntry::new(
            payment.id,
            payer.id,
            EntryType::Debit,
            cmd.amount_cents,
            cmd.currency.clone(),
            payer_new,
        )
        .insert(&mut *tx)
        .await?;
        LedgerEntry::new(
            payment.id,
            payee.id,
            EntryType::Credit,
            cmd.amount_cents,
            cmd.currency.clone(),
            payee_new,
        )
        .insert(&mut *tx)
        .await?;

        apply_balance(&mut tx, payer.id, payer_new, payer_balance.version).await?;
        apply_balance(&mut tx, payee.id, payee_new, payee_balance.version).await?;

        OutboxRecord::new(
            AGGREGATE_PAYMENT,
            payment.id.to_string(),
            EVENT_PAYMENT_AUTHORIZED,
            serde_json::json!({
                "payment_id": payment.id.to_string(),
                "payer_account_id": payer.id.to_string(),
                "payee_account_id": payee.id.to_string(),
                "amount_cents": cmd.amount_cents,
                "currency": cmd.currency,
            }),
        )
        .insert(&mut *tx)
        .await?;

        let outcome = AuthorizeOutcome {
            payment_id: payment.id.to_string(),
            status: AuthorizeStatus::Authorized,
            error: None,
            processed_at: payment.created_at,
        };
        IdempotencyRecord::mark_completed(
            &cmd.idempotency_key,
            payment.id,
            serde_json::to_value(&outcome)?,
            &mut *tx,
        )
        .await?;

        tx.commit().await?;

        info!(
            payment_id = %payment.id,
            payer = %payer.id,
            payee = %payee.id,
            amount_cents = cmd.amount_cents,
            status = "AUTHORIZED",
            "payment_authorized"
        );

        Ok(outcome)
    }

    /// Decline path: the decline itself is the committed outcome. A payment
    /// row (and its `PaymentDeclined` event) is persisted whenever both
    /// referenced accounts exist; declines for unknown accounts are recorded
    /// through the idempotency snapshot alone, since a payment row cannot
    /// reference a missing account.
    async fn commit_decline(
        &self,
        mut tx: Transaction<'_, Postgres>,
        cmd: &AuthorizeCommand,
        code: DeclineCode,
        message: String,
        payer: Option<Account>,
        payee: Option<Account>,
    ) -> Result<AuthorizeOutcome, EngineError> {
        let payer = match payer {
            Some(account) => Some(account),
            None => lookup_account(&cmd.payer_account_id, &mut *tx).await?,
        };
        let payee = match payee {
            Some(account) => Some(account),
            None => lookup_account(&cmd.payee_account_id, &mut *tx).await?,
        };

        let mut payment_id = None;
        if let (Some(payer), Some(payee)) = (&payer, &payee) {
            let payment = Payment::declined(
                cmd.idempotency_key.clone(),
                payer.id,
                payee.id,
                cmd.amount_cents,
                cmd.currency.clone(),
                cmd.description.clone(),
                code,
                message.clone(),
            );
            payment.insert(&mut *tx).await?;

            OutboxRecord::new(
                AGGREGATE_PAYMENT,
                payment.id.to_string(),
                EVENT_PAYMENT_DECLINED,
                serde_json::json!({
                    "payment_id": payment.id.to_string(),
                    "payer_account_id": payer.id.to_string(),
                    "payee_account_id": payee.id.to_string(),
                    "amount_cents": cmd.amount_cents,
                    "currency": cmd.currency,
                    "error_code": code.as_str(),
                    "error_message": message,
                }),
            )
            .insert(&mut *tx)
            .await?;

            payment_id = Some(payment.id);
        }

        let outcome = AuthorizeOutcome {
            payment_id: payment_id.map(|id| id.to_string()).unwrap_or_default(),
            status: AuthorizeStatus::Declined,
            error: Some(AuthorizeError {
                code,
                message,
            }),
            processed_at: Utc::now(),
        };
        IdempotencyRecord::mark_failed(
            &cmd.idempotency_key,
            payment_id,
            serde_json::to_value(&outcome)?,
            &mut *tx,
        )
        .await?;

        tx.commit().await?;

        info!(
            idempotency_key = %cmd.idempotency_key,
            error_code = %code,
            status = "DECLINED",
            "payment_declined"
        );

        Ok(outcome)
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, EngineError> {
        let Ok(id) = PaymentId::parse(payment_id) else {
            return Ok(None);
        };
        Ok(Payment::find(id, &self.pool).await?)
    }

    pub async fn get_account_balance(
        &self,
        account_id: &str,
    ) -> Result<Option<AccountBalance>, EngineError> {
        let Ok(id) = AccountId::parse(account_id) else {
            return Ok(None);
        };
        Ok(AccountBalance::find(id, &self.pool).await?)
    }
}

/// Resolves a replay of an already-settled idempotency key.
fn replay(key: &str, record: IdempotencyRecord) -> Result<AuthorizeOutcome, EngineError> {
    match record.status {
        IdempotencyStatus::Pending => Err(EngineError::RequestInFlight),
        IdempotencyStatus::Completed => {
            info!(
                idempotency_key = %key,
                payment_id = record.payment_id.map(|id| id.to_string()).unwrap_or_default(),
                "idempotent_replay"
            );
            let mut outcome = snapshot_outcome(&record);
            outcome.status = AuthorizeStatus::Duplicate;
            Ok(outcome)
        }
        IdempotencyStatus::Failed => {
            info!(idempotency_key = %key, "declined_replay");
            Ok(snapshot_outcome(&record))
        }
    }
}

/// Reconstructs the original outcome from the stored snapshot, falling back
/// to what the record itself knows when the snapshot is absent.
fn snapshot_outcome(record: &IdempotencyRecord) -> AuthorizeOutcome {
    record
        .response_data
        .clone()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_else(|| AuthorizeOutcome {
            payment_id: record
                .payment_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            status: match record.status {
                IdempotencyStatus::Failed => AuthorizeStatus::Declined,
                _ => AuthorizeStatus::Duplicate,
            },
            error: None,
            processed_at: record.created_at,
        })
}

async fn apply_balance(
    tx: &mut Transaction<'_, Postgres>,
    account_id: AccountId,
    new_available_cents: i64,
    expected_version: i64,
) -> Result<(), EngineError> {
    let updated =
        AccountBalance::apply(account_id, new_available_cents, expected_version, &mut **tx).await?;
    if updated == 0 {
        warn!(account_id = %account_id, expected_version, "balance_version_conflict");
        return Err(EngineError::VersionConflict(account_id.to_string()));
    }
    Ok(())
}

/// Result of looking up an account that must exist and be ACTIVE.
enum Found {
    Active(Account),
    Inactive(Account),
    Missing,
}

impl Found {
    fn into_account(self) -> Option<Account> {
        match self {
            Found::Active(account) | Found::Inactive(account) => Some(account),
            Found::Missing => None,
        }
    }
}

async fn find_active_account(
    raw_id: &str,
    executor: impl PgExecutor<'_>,
) -> Result<Found, EngineError> {
    let Ok(id) = AccountId::parse(raw_id) else {
        return Ok(Found::Missing);
    };
    Ok(match Account::find(id, executor).await? {
        None => Found::Missing,
        Some(account) if account.status == AccountStatus::Active => Found::Active(account),
        Some(account) => Found::Inactive(account),
    })
}

async fn lookup_account(
    raw_id: &str,
    executor: impl PgExecutor<'_>,
) -> Result<Option<Account>, EngineError> {
    let Ok(id) = AccountId::parse(raw_id) else {
        return Ok(None);
    };
    Ok(Account::find(id, executor).await?)
}

fn require_non_empty(value: &str, field: &'static str) -> Result<(), EngineError> {
    if value.is_empty() {
        return Err(EngineError::MissingField(field));
    }
    Ok(())
}

/// Byte-for-byte uppercase comparison; the only normalisation is requiring
/// three uppercase ASCII letters.
fn is_valid_currency(currency: &str) -> bool {
    currency.len() == 3 && currency.bytes().all(|b| b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_validation() {
        assert!(is_valid_currency("USD"));
        assert!(is_valid_currency("EUR"));
        assert!(!is_valid_currency("usd"));
        assert!(!is_valid_currency("US"));
        assert!(!is_valid_currency("USDT"));
        assert!(!is_valid_currency("U5D"));
    }

    #[test]
    fn outcome_snapshot_roundtrip() {
        let outcome = AuthorizeOutcome {
            payment_id: "01JD0000000000000000000000".to_string(),
            status: AuthorizeStatus::Declined,
            error: Some(AuthorizeError {
                code: DeclineCode::InsufficientFunds,
                message: "Insufficient funds".to_string(),
            }),
            processed_at: Utc::now(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "DECLINED");
        assert_eq!(value["error"]["code"], "INSUFFICIENT_FUNDS");
        let parsed: AuthorizeOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.status, AuthorizeStatus::Declined);
        assert_eq!(parsed.payment_id, outcome.payment_id);
    }

    #[test]
    fn missing_field_is_invalid_argument() {
        assert!(EngineError::MissingField("currency").is_invalid_argument());
        assert!(EngineError::DescriptionTooLong.is_invalid_argument());
        assert!(!EngineError::RequestInFlight.is_invalid_argument());
    }
}
