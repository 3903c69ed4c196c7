//! Wire messages for `payment.v1.PaymentService`.
//!
//! Messages are prost structs over the standard protobuf wire format; the
//! service glue (`payment_service_server` / `payment_service_client`) is
//! generated by `tonic_build::manual` in `build.rs`, so no `.proto` file is
//! checked in.

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum PaymentStatusCode {
    Unspecified = 0,
    Authorized = 1,
    Declined = 2,
    Duplicate = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum PaymentErrorCode {
    Unspecified = 0,
    InsufficientFunds = 1,
    AccountNotFound = 2,
    InvalidAmount = 3,
    SameAccount = 4,
    CurrencyMismatch = 5,
    RateLimited = 6,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AuthorizePaymentRequest {
    #[prost(string, tag = "1")]
    pub idempotency_key: String,
    #[prost(string, tag = "2")]
    pub payer_account_id: String,
    #[prost(string, tag = "3")]
    pub payee_account_id: String,
    #[prost(int64, tag = "4")]
    pub amount_cents: i64,
    #[prost(string, tag = "5")]
    pub currency: String,
    #[prost(string, tag = "6")]
    pub description: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PaymentError {
    #[prost(enumeration = "PaymentErrorCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AuthorizePaymentResponse {
    #[prost(string, tag = "1")]
    pub payment_id: String,
    #[prost(enumeration = "PaymentStatusCode", tag = "2")]
    pub status: i32,
    #[prost(message, optional, tag = "3")]
    pub error: Option<PaymentError>,
    /// RFC3339 with offset.
    #[prost(string, tag = "4")]
    pub processed_at: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetPaymentRequest {
    #[prost(string, tag = "1")]
    pub payment_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Payment {
    #[prost(string, tag = "1")]
    pub payment_id: String,
    #[prost(string, tag = "2")]
    pub payer_account_id: String,
    #[prost(string, tag = "3")]
    pub payee_account_id: String,
    #[prost(int64, tag = "4")]
    pub amount_cents: i64,
    #[prost(string, tag = "5")]
    pub currency: String,
    #[prost(enumeration = "PaymentStatusCode", tag = "6")]
    pub status: i32,
    #[prost(string, tag = "7")]
    pub description: String,
    #[prost(message, optional, tag = "8")]
    pub error: Option<PaymentError>,
    #[prost(string, tag = "9")]
    pub created_at: String,
    #[prost(string, tag = "10")]
    pub updated_at: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetPaymentResponse {
    #[prost(message, optional, tag = "1")]
    pub payment: Option<Payment>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetAccountBalanceRequest {
    #[prost(string, tag = "1")]
    pub account_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetAccountBalanceResponse {
    #[prost(string, tag = "1")]
    pub account_id: String,
    #[prost(int64, tag = "2")]
    pub available_cents: i64,
    #[prost(int64, tag = "3")]
    pub pending_cents: i64,
    #[prost(string, tag = "4")]
    pub currency: String,
}

include!(concat!(env!("OUT_DIR"), "/payment.v1.PaymentService.rs"));

pub use payment_service_client::PaymentServiceClient;
pub use payment_service_server::{PaymentService, PaymentServiceServer};
