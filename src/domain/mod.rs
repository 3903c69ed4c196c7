//! Domain entities and their persistence.
//!
//! Records carry their own SQL as associated functions taking an executor,
//! so the same method runs against a pool or inside a transaction.

pub mod account;
pub mod idempotency;
pub mod ledger;
pub mod outbox;
pub mod payment;

pub use account::{Account, AccountBalance, AccountStatus};
pub use idempotency::{IdempotencyRecord, IdempotencyStatus};
pub use ledger::{EntryType, LedgerEntry};
pub use outbox::{EventEnvelope, OutboxRecord};
pub use payment::{DeclineCode, Payment, PaymentStatus};
