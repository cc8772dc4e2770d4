//! Generates the `billing.BillingService` client and server stubs.
//!
//! Messages are hand-written prost types in `src/proto.rs`; only the service
//! plumbing is generated, so no `protoc` is needed at build time.

fn main() {
    let create_billing_account = tonic_build::manual::Method::builder()
        .name("create_billing_account")
        .route_name("CreateBillingAccount")
        .input_type("crate::proto::BillingRequest")
        .output_type("crate::proto::BillingResponse")
        .codec_path("tonic::codec::ProstCodec")
        .build();

    let service = tonic_build::manual::Service::builder()
        .name("BillingService")
        .package("billing")
        .method(create_billing_account)
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
