//! Application services and infrastructure ports.

pub mod broker;
pub mod engine;
pub mod metrics;
pub mod outbox_worker;
pub mod rate_limit;
pub mod service_host;

pub use broker::{Broker, NatsBroker, TestBroker};
pub use engine::{AuthorizeCommand, AuthorizeOutcome, AuthorizeStatus, EngineError, PaymentEngine};
pub use metrics::Metrics;
pub use outbox_worker::{OutboxWorker, OutboxWorkerConfig};
pub use rate_limit::{AllowAllLimiter, RateLimitDecision, RateLimiter, SlidingWindowLimiter};
pub use service_host::Service;
