//! Wire-compatible `grpc.health.v1.Health` implementation.
//!
//! Shares the standard package and message layout so off-the-shelf probes
//! and load balancers can watch the service drain during shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub const PAYMENT_SERVICE_NAME: &str = "payment.v1.PaymentService";

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum ServingStatus {
    Unknown = 0,
    Serving = 1,
    NotServing = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheckRequest {
    #[prost(string, tag = "1")]
    pub service: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheckResponse {
    #[prost(enumeration = "ServingStatus", tag = "1")]
    pub status: i32,
}

include!(concat!(env!("OUT_DIR"), "/grpc.health.v1.Health.rs"));

pub use health_client::HealthClient;
pub use health_server::{Health, HealthServer};

/// Shared serving flag. Flipped to NOT_SERVING when shutdown begins, before
/// the listener stops accepting, so balancers drain first.
#[derive(Clone, Default)]
pub struct HealthState {
    not_serving: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_not_serving(&self) {
        self.not_serving.store(true, Ordering::SeqCst);
    }

    pub fn is_serving(&self) -> bool {
        !self.not_serving.load(Ordering::SeqCst)
    }
}

pub struct HealthService {
    state: HealthState,
}

impl HealthService {
    pub fn new(state: HealthState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let service = request.into_inner().service;
        match service.as_str() {
            "" | PAYMENT_SERVICE_NAME => {
                let status = if self.state.is_serving() {
                    ServingStatus::Serving
                } else {
                    ServingStatus::NotServing
                };
                Ok(Response::new(HealthCheckResponse {
                    status: status as i32,
                }))
            }
            other => Err(Status::not_found(format!("unknown service {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serving_until_drain_starts() {
        let state = HealthState::new();
        let service = HealthService::new(state.clone());

        let response = service
            .check(Request::new(HealthCheckRequest {
                service: PAYMENT_SERVICE_NAME.to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(response.into_inner().status, ServingStatus::Serving as i32);

        state.set_not_serving();
        let response = service
            .check(Request::new(HealthCheckRequest {
                service: String::new(),
            }))
            .await
            .unwrap();
        assert_eq!(
            response.into_inner().status,
            ServingStatus::NotServing as i32
        );
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let service = HealthService::new(HealthState::new());
        let error = service
            .check(Request::new(HealthCheckRequest {
                service: "some.other.Service".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(error.code(), tonic::Code::NotFound);
    }
}
