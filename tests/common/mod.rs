pub mod fixtures;
pub mod harness;

pub use harness::TestHarness;

use paygate::kernel::RateLimiter;
use paygate::server::api::PaymentServiceServer;
use paygate::server::health::{HealthServer, HealthService};
use paygate::server::{AdmissionGate, HealthState, PaymentGrpc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Serves the full gRPC surface on an ephemeral port, returning the bound
/// address, the shutdown token and the health state used for drain tests.
pub async fn spawn_grpc(
    harness: &TestHarness,
    limiter: Option<Arc<dyn RateLimiter>>,
) -> anyhow::Result<(SocketAddr, CancellationToken, HealthState)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);

    let health_state = HealthState::new();
    let gate = AdmissionGate::new(limiter, harness.metrics.clone(), Duration::from_secs(60));
    let handler = PaymentGrpc::new(
        harness.engine.clone(),
        gate,
        harness.metrics.clone(),
        health_state.clone(),
    );

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let health_service = HealthService::new(health_state.clone());
    tokio::spawn(async move {
        let _ = tonic::transport::Server::builder()
            .add_service(PaymentServiceServer::new(handler))
            .add_service(HealthServer::new(health_service))
            .serve_with_incoming_shutdown(incoming, async move { token.cancelled().await })
            .await;
    });

    Ok((addr, shutdown, health_state))
}
