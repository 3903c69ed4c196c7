//! Shared types used across the crate.

pub mod id;

pub use id::{AccountId, EventId, Id, LedgerEntryId, PaymentId};
