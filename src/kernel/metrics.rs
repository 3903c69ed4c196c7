//! Prometheus instruments.
//!
//! `Metrics` owns its registry and every instrument; it is built once in
//! `main` and passed explicitly to whoever records. No process-wide
//! statics.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

const DURATION_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

pub struct Metrics {
    registry: Registry,
    pub grpc_requests_total: IntCounterVec,
    pub grpc_request_duration_seconds: HistogramVec,
    pub payment_requests_total: IntCounterVec,
    pub payment_duration_seconds: Histogram,
    pub rate_limit_exceeded_total: IntCounterVec,
    pub outbox_events_published_total: IntCounterVec,
    pub outbox_events_failed_total: IntCounterVec,
    pub outbox_events_dead_lettered_total: IntCounterVec,
    pub outbox_pending_events: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let grpc_requests_total = IntCounterVec::new(
            Opts::new("grpc_requests_total", "Total number of gRPC requests"),
            &["method", "status_code"],
        )?;
        let grpc_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("grpc_request_duration_seconds", "gRPC request duration")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["method", "status_code"],
        )?;
        let payment_requests_total = IntCounterVec::new(
            Opts::new("payment_requests_total", "Total number of payment requests"),
            &["status", "error_code"],
        )?;
        let payment_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("payment_duration_seconds", "Payment processing duration")
                .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let rate_limit_exceeded_total = IntCounterVec::new(
            Opts::new(
                "rate_limit_exceeded_total",
                "Total number of rate limited requests",
            ),
            &["identifier_type"],
        )?;
        let outbox_events_published_total = IntCounterVec::new(
            Opts::new("outbox_events_published_total", "Total outbox events published"),
            &["event_type"],
        )?;
        let outbox_events_failed_total = IntCounterVec::new(
            Opts::new(
                "outbox_events_failed_total",
                "Total outbox events that failed to publish",
            ),
            &["event_type"],
        )?;
        let outbox_events_dead_lettered_total = IntCounterVec::new(
            Opts::new(
                "outbox_events_dead_lettered_total",
                "Total outbox events routed to the dead letter topic",
            ),
            &["event_type"],
        )?;
        let outbox_pending_events = IntGauge::new(
            "outbox_pending_events",
            "Number of pending events in the outbox",
        )?;

        registry.register(Box::new(grpc_requests_total.clone()))?;
        registry.register(Box::new(grpc_request_duration_seconds.clone()))?;
        registry.register(Box::new(payment_requests_total.clone()))?;
        registry.register(Box::new(payment_duration_seconds.clone()))?;
        registry.register(Box::new(rate_limit_exceeded_total.clone()))?;
        registry.register(Box::new(outbox_events_published_total.clone()))?;
        registry.register(Box::new(outbox_events_failed_total.clone()))?;
        registry.register(Box::new(outbox_events_dead_lettered_total.clone()))?;
        registry.register(Box::new(outbox_pending_events.clone()))?;

        Ok(Self {
            registry,
            grpc_requests_total,
            grpc_request_duration_seconds,
            payment_requests_total,
            payment_duration_seconds,
            rate_limit_exceeded_total,
            outbox_events_published_total,
            outbox_events_failed_total,
            outbox_events_dead_lettered_total,
            outbox_pending_events,
        })
    }

    /// Renders every registered instrument in the Prometheus text format.
    pub fn export(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(error) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %error, "metrics_encoding_failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruments_register_without_collisions() {
        let metrics = Metrics::new().unwrap();
        metrics
            .grpc_requests_total
            .with_label_values(&["AuthorizePayment", "Ok"])
            .inc();
        metrics
            .rate_limit_exceeded_total
            .with_label_values(&["client"])
            .inc();
        metrics.outbox_pending_events.set(3);

        let text = metrics.export();
        assert!(text.contains("grpc_requests_total"));
        assert!(text.contains("rate_limit_exceeded_total"));
        assert!(text.contains("outbox_pending_events 3"));
    }

    #[test]
    fn export_is_plain_text() {
        let metrics = Metrics::new().unwrap();
        metrics
            .payment_requests_total
            .with_label_values(&["AUTHORIZED", ""])
            .inc();
        let text = metrics.export();
        assert!(text.contains("# TYPE payment_requests_total counter"));
    }
}
