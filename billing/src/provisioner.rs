//! Account provisioning behind the billing RPC.
//!
//! The server validates requests and delegates account creation to an
//! [`AccountProvisioner`]. Two implementations ship with the crate:
//!
//! - [`PlaceholderProvisioner`]: always answers account `12345`, `ACTIVE`
//! - [`RegistryProvisioner`]: one `acct-<uuid>` account per patient, kept in memory
//!
//! # Dyn Compatibility
//!
//! The trait returns `Pin<Box<dyn Future>>` so the server can hold an
//! `Arc<dyn AccountProvisioner>` chosen at startup.

use crate::account::{AccountRequest, AccountStatus, BillingAccount};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Account identifier returned by [`PlaceholderProvisioner`].
pub const PLACEHOLDER_ACCOUNT_ID: &str = "12345";

/// Why a provisioner could not open an account.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// Backing system temporarily unavailable; the caller may retry.
    #[error("Provisioner unavailable: {0}")]
    Unavailable(String),

    /// The request is valid but cannot be honoured.
    #[error("Provisioning refused: {0}")]
    Refused(String),
}

/// Opens billing accounts.
pub trait AccountProvisioner: Send + Sync {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    /// Open (or return the existing) account for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] if no account can be produced.
    fn provision<'a>(
        &'a self,
        request: &'a AccountRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BillingAccount, ProvisionError>> + Send + 'a>>;
}

/// Answers every request with the fixed account `12345` in status `ACTIVE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderProvisioner;

impl AccountProvisioner for PlaceholderProvisioner {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn provision<'a>(
        &'a self,
        _request: &'a AccountRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BillingAccount, ProvisionError>> + Send + 'a>> {
        Box::pin(async {
            Ok(BillingAccount {
                account_id: PLACEHOLDER_ACCOUNT_ID.to_string(),
                status: AccountStatus::Active,
            })
        })
    }
}

/// Keeps one account per patient id for the life of the process.
///
/// Repeating a request for the same patient returns the account opened the first
/// time, so client retries never open duplicates.
#[derive(Debug, Default)]
pub struct RegistryProvisioner {
    accounts: Mutex<HashMap<String, BillingAccount>>,
}

impl RegistryProvisioner {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts opened so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no account has been opened yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccountProvisioner for RegistryProvisioner {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn provision<'a>(
        &'a self,
        request: &'a AccountRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BillingAccount, ProvisionError>> + Send + 'a>> {
        Box::pin(async move {
            let mut accounts = self
                .accounts
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let account = accounts
                .entry(request.patient_id.clone())
                .or_insert_with(|| {
                    let account = BillingAccount {
                        account_id: format!("acct-{}", uuid::Uuid::new_v4()),
                        status: AccountStatus::Active,
                    };
                    tracing::info!(
                        patient_id = %request.patient_id,
                        account_id = %account.account_id,
                        "Opened billing account"
                    );
                    account
                });
            Ok(account.clone())
        })
    }
}
