//! gRPC handlers for the payment service.
//!
//! Every method runs the admission gate first, then the engine, then maps
//! the outcome onto the wire. Domain outcomes (authorized, declined,
//! duplicate) are all transport-level OK; only infrastructure failures and
//! caller faults become non-OK statuses.

use std::sync::Arc;
use std::time::Instant;
use tonic::{Code, Request, Response, Status};
use tracing::{error, info};

use crate::domain::payment::{DeclineCode, PaymentStatus};
use crate::kernel::engine::{
    AuthorizeCommand, AuthorizeOutcome, AuthorizeStatus, EngineError, PaymentEngine,
};
use crate::kernel::metrics::Metrics;
use crate::server::admission::AdmissionGate;
use crate::server::api;
use crate::server::health::HealthState;

pub struct PaymentGrpc {
    engine: Arc<PaymentEngine>,
    gate: AdmissionGate,
    metrics: Arc<Metrics>,
    health: HealthState,
}

impl PaymentGrpc {
    pub fn new(
        engine: Arc<PaymentEngine>,
        gate: AdmissionGate,
        metrics: Arc<Metrics>,
        health: HealthState,
    ) -> Self {
        Self {
            engine,
            gate,
            metrics,
            health,
        }
    }

    /// Records the per-request duration and total, labelled by method and
    /// final gRPC status. Runs for every request, including gate rejections.
    fn observe(&self, method: &str, started: Instant, code: Code) {
        let status_code = format!("{code:?}");
        self.metrics
            .grpc_request_duration_seconds
            .with_label_values(&[method, &status_code])
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .grpc_requests_total
            .with_label_values(&[method, &status_code])
            .inc();
    }

    fn check_serving(&self) -> Result<(), Status> {
        if self.health.is_serving() {
            Ok(())
        } else {
            Err(Status::unavailable("server is draining"))
        }
    }

    async fn handle_authorize(
        &self,
        request: Request<api::AuthorizePaymentRequest>,
    ) -> Result<Response<api::AuthorizePaymentResponse>, Status> {
        self.check_serving()?;
        self.gate.admit(request.metadata(), "AuthorizePayment").await?;

        let req = request.into_inner();
        info!(
            method = "AuthorizePayment",
            idempotency_key = %req.idempotency_key,
            "request_received"
        );

        let cmd = AuthorizeCommand {
            idempotency_key: req.idempotency_key,
            payer_account_id: req.payer_account_id,
            payee_account_id: req.payee_account_id,
            amount_cents: req.amount_cents,
            currency: req.currency,
            description: if req.description.is_empty() {
                None
            } else {
                Some(req.description)
            },
        };

        let started = Instant::now();
        let outcome = self.engine.authorize(&cmd).await.map_err(map_engine_error)?;
        self.metrics
            .payment_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .payment_requests_total
            .with_label_values(&[
                status_label(outcome.status),
                outcome
                    .error
                    .as_ref()
                    .map(|e| e.code.as_str())
                    .unwrap_or(""),
            ])
            .inc();

        Ok(Response::new(outcome_response(outcome)))
    }

    async fn handle_get_payment(
        &self,
        request: Request<api::GetPaymentRequest>,
    ) -> Result<Response<api::GetPaymentResponse>, Status> {
        self.check_serving()?;
        self.gate.admit(request.metadata(), "GetPayment").await?;

        let payment_id = request.into_inner().payment_id;
        if payment_id.is_empty() {
            return Err(Status::invalid_argument("payment_id is required"));
        }

        let payment = self
            .engine
            .get_payment(&payment_id)
            .await
            .map_err(map_engine_error)?
            .ok_or_else(|| Status::not_found(format!("Payment {payment_id} not found")))?;

        info!(
            method = "GetPayment",
            payment_id = %payment.id,
            amount_cents = payment.amount_cents,
            "get_payment"
        );

        let error = match (&payment.error_code, &payment.error_message) {
            (None, None) => None,
            (code, message) => Some(api::PaymentError {
                code: code
                    .as_deref()
                    .and_then(DeclineCode::parse)
                    .map(error_code)
                    .unwrap_or(api::PaymentErrorCode::Unspecified) as i32,
                message: message.clone().unwrap_or_default(),
            }),
        };

        Ok(Response::new(api::GetPaymentResponse {
            payment: Some(api::Payment {
                payment_id: payment.id.to_string(),
                payer_account_id: payment.payer_account_id.to_string(),
                payee_account_id: payment.payee_account_id.to_string(),
                amount_cents: payment.amount_cents,
                currency: payment.currency,
                status: match payment.status {
                    PaymentStatus::Authorized => api::PaymentStatusCode::Authorized,
                    PaymentStatus::Declined => api::PaymentStatusCode::Declined,
                } as i32,
                description: payment.description.unwrap_or_default(),
                error,
                created_at: payment.created_at.to_rfc3339(),
                updated_at: payment.updated_at.to_rfc3339(),
            }),
        }))
    }

    async fn handle_get_account_balance(
        &self,
        request: Request<api::GetAccountBalanceRequest>,
    ) -> Result<Response<api::GetAccountBalanceResponse>, Status> {
        self.check_serving()?;
        self.gate.admit(request.metadata(), "GetAccountBalance").await?;

        let account_id = request.into_inner().account_id;
        if account_id.is_empty() {
            return Err(Status::invalid_argument("account_id is required"));
        }

        let balance = self
            .engine
            .get_account_balance(&account_id)
            .await
            .map_err(map_engine_error)?
            .ok_or_else(|| {
                Status::not_found(format!("Account balance for {account_id} not found"))
            })?;

        info!(
            method = "GetAccountBalance",
            account_id = %balance.account_id,
            available = balance.available_cents,
            "get_balance"
        );

        Ok(Response::new(api::GetAccountBalanceResponse {
            account_id: balance.account_id.to_string(),
            available_cents: balance.available_cents,
            pending_cents: balance.pending_cents,
            currency: balance.currency,
        }))
    }
}

#[tonic::async_trait]
impl api::PaymentService for PaymentGrpc {
    async fn authorize_payment(
        &self,
        request: Request<api::AuthorizePaymentRequest>,
    ) -> Result<Response<api::AuthorizePaymentResponse>, Status> {
        let started = Instant::now();
        let result = self.handle_authorize(request).await;
        self.observe("AuthorizePayment", started, result_code(&result));
        result
    }

    async fn get_payment(
        &self,
        request: Request<api::GetPaymentRequest>,
    ) -> Result<Response<api::GetPaymentResponse>, Status> {
        let started = Instant::now();
        let result = self.handle_get_payment(request).await;
        self.observe("GetPayment", started, result_code(&result));
        result
    }

    async fn get_account_balance(
        &self,
        request: Request<api::GetAccountBalanceRequest>,
    ) -> Result<Response<api::GetAccountBalanceResponse>, Status> {
        let started = Instant::now();
        let result = self.handle_get_account_balance(request).await;
        self.observe("GetAccountBalance", started, result_code(&result));
        result
    }
}

fn result_code<T>(result: &Result<Response<T>, Status>) -> Code {
    match result {
        Ok(_) => Code::Ok,
        Err(status) => status.code(),
    }
}

fn status_label(status: AuthorizeStatus) -> &'static str {
    match status {
        AuthorizeStatus::Authorized => "AUTHORIZED",
        AuthorizeStatus::Declined => "DECLINED",
        AuthorizeStatus::Duplicate => "DUPLICATE",
    }
}

fn error_code(code: DeclineCode) -> api::PaymentErrorCode {
    match code {
        DeclineCode::InsufficientFunds => api::PaymentErrorCode::InsufficientFunds,
        DeclineCode::AccountNotFound => api::PaymentErrorCode::AccountNotFound,
        DeclineCode::InvalidAmount => api::PaymentErrorCode::InvalidAmount,
        DeclineCode::SameAccount => api::PaymentErrorCode::SameAccount,
        DeclineCode::CurrencyMismatch => api::PaymentErrorCode::CurrencyMismatch,
    }
}

fn outcome_response(outcome: AuthorizeOutcome) -> api::AuthorizePaymentResponse {
    api::AuthorizePaymentResponse {
        payment_id: outcome.payment_id,
        status: match outcome.status {
            AuthorizeStatus::Authorized => api::PaymentStatusCode::Authorized,
            AuthorizeStatus::Declined => api::PaymentStatusCode::Declined,
            AuthorizeStatus::Duplicate => api::PaymentStatusCode::Duplicate,
        } as i32,
        error: outcome.error.map(|e| api::PaymentError {
            code: error_code(e.code) as i32,
            message: e.message,
        }),
        processed_at: outcome.processed_at.to_rfc3339(),
    }
}

/// Transport mapping for engine failures. Declines never reach here; they
/// are OK responses. Storage-level detail is logged, not leaked.
fn map_engine_error(error: EngineError) -> Status {
    match error {
        error @ (EngineError::MissingField(_) | EngineError::DescriptionTooLong) => {
            Status::invalid_argument(error.to_string())
        }
        EngineError::RequestInFlight => {
            Status::unavailable("a request with this idempotency key is in flight; retry")
        }
        EngineError::VersionConflict(account) => {
            error!(account = %account, "balance_version_conflict");
            Status::unavailable("concurrent balance update; retry with the same idempotency key")
        }
        EngineError::Storage(source) => {
            error!(error = %source, "storage_failure");
            Status::unavailable("transient storage failure; retry with the same idempotency key")
        }
        EngineError::BalanceMissing(account) => {
            error!(account = %account, "balance_row_missing");
            Status::internal("internal error")
        }
        EngineError::Snapshot(source) => {
            error!(error = %source, "snapshot_encoding_failed");
            Status::internal("internal error")
        }
    }
}
