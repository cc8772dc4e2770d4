//! # Carebridge Billing
//!
//! The `createBillingAccount` RPC between the patient and billing services.
//!
//! - [`server`]: tonic server validating requests and delegating to an
//!   [`AccountProvisioner`](provisioner::AccountProvisioner)
//! - [`client`]: [`BillingClient`](client::BillingClient), a cloneable, deadline-bounded
//!   handle over one shared HTTP/2 channel
//! - [`proto`]: wire messages and generated service stubs
//!
//! Service `billing.BillingService`, method `CreateBillingAccount`, plaintext on
//! `localhost:9001` by default.

pub mod account;
pub mod client;
pub mod proto;
pub mod provisioner;
pub mod server;

pub use account::{AccountRequest, AccountStatus, BillingAccount, InvalidRequest};
pub use client::{BillingClient, BillingClientConfig, BillingClientError};
pub use provisioner::{
    AccountProvisioner, PlaceholderProvisioner, ProvisionError, RegistryProvisioner,
};
pub use server::{BillingGrpcService, BillingServerError, serve, serve_with_listener};
