//! Billing accounts and the requests that open them.

use crate::proto::{BillingRequest, BillingStatus};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a billing account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccountStatus {
    /// Ready to bill
    Active,
    /// Accepted, not yet usable
    Pending,
    /// Provisioning did not succeed
    Failed,
}

impl AccountStatus {
    /// Upper-case status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Pending => "PENDING",
            Self::Failed => "FAILED",
        }
    }

    /// Wire enum for this status.
    #[must_use]
    pub const fn to_wire(self) -> BillingStatus {
        match self {
            Self::Active => BillingStatus::Active,
            Self::Pending => BillingStatus::Pending,
            Self::Failed => BillingStatus::Failed,
        }
    }

    /// Decode a wire value. `Unspecified` and unknown values yield `None`.
    #[must_use]
    pub fn from_wire(value: i32) -> Option<Self> {
        match BillingStatus::try_from(value).ok()? {
            BillingStatus::Active => Some(Self::Active),
            BillingStatus::Pending => Some(Self::Pending),
            BillingStatus::Failed => Some(Self::Failed),
            BillingStatus::Unspecified => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opened billing account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BillingAccount {
    /// Identifier assigned by the billing service, never empty
    pub account_id: String,
    /// Current status
    pub status: AccountStatus,
}

/// Why a billing request was refused before reaching a provisioner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRequest {
    /// No patient id
    #[error("patient_id must not be empty")]
    MissingPatientId,

    /// Email present but not an address
    #[error("email '{0}' is not a valid address")]
    MalformedEmail(String),
}

/// A validated request to open a billing account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRequest {
    /// Patient the account belongs to
    pub patient_id: String,
    /// Patient name, may be empty
    pub name: String,
    /// Patient email, empty or containing `@`
    pub email: String,
}

impl TryFrom<BillingRequest> for AccountRequest {
    type Error = InvalidRequest;

    fn try_from(request: BillingRequest) -> Result<Self, Self::Error> {
        if request.patient_id.trim().is_empty() {
            return Err(InvalidRequest::MissingPatientId);
        }
        if !request.email.is_empty() && !request.email.contains('@') {
            return Err(InvalidRequest::MalformedEmail(request.email));
        }
        Ok(Self {
            patient_id: request.patient_id,
            name: request.name,
            email: request.email,
        })
    }
}
