//! RPC transport, admission glue, health, and the metrics listener.

pub mod admission;
pub mod api;
pub mod handlers;
pub mod health;
pub mod metrics_server;

pub use admission::AdmissionGate;
pub use handlers::PaymentGrpc;
pub use health::{HealthService, HealthState};
