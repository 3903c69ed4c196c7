//! Long-running background services.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A named task that runs until its shutdown token fires (or it decides to
/// stop on its own, e.g. a latched circuit breaker).
#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}
