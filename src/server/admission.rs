//! Request admission: the rate-limit gate consulted before any handler work.
//!
//! The caller identity is the client id metadata when present, else the
//! first hop of `x-forwarded-for`, else the method name. Health checks
//! bypass the gate entirely (they are wired as a separate service).

use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::MetadataMap;
use tonic::Status;
use tracing::warn;

use crate::kernel::metrics::Metrics;
use crate::kernel::rate_limit::RateLimiter;

pub struct AdmissionGate {
    limiter: Option<Arc<dyn RateLimiter>>,
    metrics: Arc<Metrics>,
    retry_after: Duration,
}

impl AdmissionGate {
    pub fn new(
        limiter: Option<Arc<dyn RateLimiter>>,
        metrics: Arc<Metrics>,
        retry_after: Duration,
    ) -> Self {
        Self {
            limiter,
            metrics,
            retry_after,
        }
    }

    /// Admits or rejects the request. Rejections carry RESOURCE_EXHAUSTED
    /// and are counted under the identifier's category; they never touch
    /// the database.
    pub async fn admit(&self, metadata: &MetadataMap, method: &str) -> Result<(), Status> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        let (identifier, category) = identify(metadata, method);
        let decision = limiter.check(&identifier).await;
        if !decision.allowed {
            self.metrics
                .rate_limit_exceeded_total
                .with_label_values(&[category])
                .inc();
            warn!(method, identifier = %identifier, "rate_limit_exceeded");
            return Err(Status::resource_exhausted(format!(
                "Rate limit exceeded. Retry after {}s",
                self.retry_after.as_secs()
            )));
        }
        Ok(())
    }
}

fn identify(metadata: &MetadataMap, method: &str) -> (String, &'static str) {
    if let Some(client_id) = metadata.get("x-client-id").and_then(|v| v.to_str().ok()) {
        return (format!("client:{client_id}"), "client");
    }
    if let Some(forwarded) = metadata.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = forwarded.split(',').next() {
            let ip = ip.trim();
            if !ip.is_empty() {
                return (format!("ip:{ip}"), "ip");
            }
        }
    }
    (format!("method:{method}"), "method")
}
