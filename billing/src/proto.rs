//! Wire types for `billing.BillingService`, mirroring `proto/billing_service.proto`.
//!
//! The generated `billing_service_server` and `billing_service_client` modules are
//! included from the build script output.

#![allow(missing_docs, clippy::pedantic, clippy::missing_const_for_fn)]

/// Request to open a billing account for a patient.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct BillingRequest {
    #[prost(string, tag = "1")]
    pub patient_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub email: ::prost::alloc::string::String,
}

/// The account the billing service opened.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct BillingResponse {
    #[prost(string, tag = "1")]
    pub account_id: ::prost::alloc::string::String,
    #[prost(enumeration = "BillingStatus", tag = "2")]
    pub status: i32,
}

/// Account status on the wire. `Unspecified` is the proto3 zero value and never a
/// valid answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum BillingStatus {
    Unspecified = 0,
    Active = 1,
    Pending = 2,
    Failed = 3,
}

include!(concat!(env!("OUT_DIR"), "/billing.BillingService.rs"));
