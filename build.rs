fn main() {
    // Message structs live in src/server/api.rs (prost derives, no .proto file);
    // only the service glue is generated here.
    let payment_service = tonic_build::manual::Service::builder()
        .name("PaymentService")
        .package("payment.v1")
        .method(
            tonic_build::manual::Method::builder()
                .name("authorize_payment")
                .route_name("AuthorizePayment")
                .input_type("crate::server::api::AuthorizePaymentRequest")
                .output_type("crate::server::api::AuthorizePaymentResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("get_payment")
                .route_name("GetPayment")
                .input_type("crate::server::api::GetPaymentRequest")
                .output_type("crate::server::api::GetPaymentResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("get_account_balance")
                .route_name("GetAccountBalance")
                .input_type("crate::server::api::GetAccountBalanceRequest")
                .output_type("crate::server::api::GetAccountBalanceResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .build();

    // Wire-compatible with the standard gRPC health protocol so off-the-shelf
    // probes and load balancers can drive draining.
    let health_service = tonic_build::manual::Service::builder()
        .name("Health")
        .package("grpc.health.v1")
        .method(
            tonic_build::manual::Method::builder()
                .name("check")
                .route_name("Check")
                .input_type("crate::server::health::HealthCheckRequest")
                .output_type("crate::server::health::HealthCheckResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new().compile(&[payment_service, health_service]);
}
