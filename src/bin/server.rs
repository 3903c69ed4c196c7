// Main entry point for the payment service.

use anyhow::{Context, Result};
use paygate::kernel::{
    Metrics, NatsBroker, OutboxWorker, OutboxWorkerConfig, PaymentEngine, RateLimiter, Service,
    SlidingWindowLimiter,
};
use paygate::server::api::PaymentServiceServer;
use paygate::server::health::{HealthServer, HealthService};
use paygate::server::{metrics_server, AdmissionGate, HealthState, PaymentGrpc};
use paygate::Config;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,paygate=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        grpc_port = config.grpc_port,
        metrics_port = config.metrics_port,
        rate_limit_enabled = config.rate_limit_enabled,
        "starting_payment_service"
    );

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let metrics = Arc::new(Metrics::new().context("Failed to build metrics registry")?);

    let limiter: Option<Arc<dyn RateLimiter>> = if config.rate_limit_enabled {
        let limiter = SlidingWindowLimiter::connect(
            &config.redis_url,
            config.rate_limit_max_requests,
            config.rate_limit_window,
        )
        .await
        .context("Failed to connect to Redis")?;
        tracing::info!(
            max_requests = config.rate_limit_max_requests,
            window_seconds = config.rate_limit_window.as_secs(),
            "rate_limiting_enabled"
        );
        Some(Arc::new(limiter))
    } else {
        None
    };

    let broker = Arc::new(
        NatsBroker::connect(&config.broker_addrs)
            .await
            .context("Failed to connect to broker")?,
    );
    tracing::info!(addrs = %config.broker_addrs, "broker_connected");

    let shutdown = CancellationToken::new();

    let metrics_task = tokio::spawn(metrics_server::serve(
        config.metrics_host.clone(),
        config.metrics_port,
        metrics.clone(),
        shutdown.clone(),
    ));

    let worker = OutboxWorker::new(
        pool.clone(),
        broker,
        metrics.clone(),
        OutboxWorkerConfig {
            batch_size: config.outbox_batch_size,
            poll_interval: config.outbox_poll_interval,
            max_retries: config.outbox_max_retries,
            base_delay: config.outbox_base_delay,
            max_delay: config.outbox_max_delay,
            topic_prefix: config.topic_prefix.clone(),
            ..Default::default()
        },
    );
    let worker_task = {
        let token = shutdown.clone();
        tokio::spawn(async move { Box::new(worker).run(token).await })
    };

    let engine = Arc::new(PaymentEngine::new(pool.clone(), config.idempotency_ttl));
    let health_state = HealthState::new();
    let gate = AdmissionGate::new(limiter, metrics.clone(), config.rate_limit_window);
    let handler = PaymentGrpc::new(engine, gate, metrics.clone(), health_state.clone());

    // SIGTERM/SIGINT: flip health to NOT-SERVING so balancers drain, then
    // trigger the shared shutdown token.
    {
        let token = shutdown.clone();
        let drain = health_state.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown_signal_received");
            drain.set_not_serving();
            token.cancel();
        });
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", config.grpc_port)
        .parse()
        .context("invalid gRPC listen address")?;
    tracing::info!(addr = %addr, "grpc_server_started");

    let grpc = tonic::transport::Server::builder()
        .add_service(PaymentServiceServer::new(handler))
        .add_service(HealthServer::new(HealthService::new(health_state)))
        .serve_with_shutdown(addr, {
            let token = shutdown.clone();
            async move { token.cancelled().await }
        });
    let mut grpc_task = tokio::spawn(grpc);

    // In-flight RPCs get a bounded grace period once the token fires.
    tokio::select! {
        result = &mut grpc_task => {
            result.context("gRPC server task panicked")?.context("gRPC server error")?;
        }
        _ = shutdown.cancelled() => {
            match tokio::time::timeout(config.shutdown_grace, &mut grpc_task).await {
                Ok(result) => {
                    result.context("gRPC server task panicked")?.context("gRPC server error")?;
                }
                Err(_) => {
                    tracing::warn!(
                        grace_seconds = config.shutdown_grace.as_secs(),
                        "shutdown_grace_exceeded"
                    );
                    grpc_task.abort();
                }
            }
        }
    }

    // Either the signal arrived or the server stopped on its own; make sure
    // the background tasks see the cancellation.
    shutdown.cancel();
    let _ = worker_task.await;
    let _ = metrics_task.await;
    pool.close().await;

    tracing::info!("payment_service_stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
