// Payment authorization and double-entry ledger service.
//
// The engine decides and atomically records fund movements; the outbox
// worker relays the resulting events to the broker with at-least-once
// semantics; admission control runs against Redis.

pub mod common;
pub mod config;
pub mod domain;
pub mod kernel;
pub mod server;

pub use config::Config;
