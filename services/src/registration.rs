//! Patient lifecycle operations of the patient service.
//!
//! Registering a patient opens a billing account over RPC and then announces the
//! patient on the event topic. The billing call is part of the operation and its
//! failure fails the registration; the announcement is best-effort, so a broker
//! outage is logged and the registration still succeeds.

use carebridge_billing::{BillingAccount, BillingClient, BillingClientError};
use carebridge_core::envelope::EventType;
use carebridge_core::record::PatientRecord;
use carebridge_runtime::PatientEventProducer;
use thiserror::Error;

/// Why a patient operation failed.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Input cannot describe a patient.
    #[error("Invalid patient: {0}")]
    InvalidPatient(&'static str),

    /// The billing account could not be opened.
    #[error("Billing account creation failed: {0}")]
    Billing(#[from] BillingClientError),
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredPatient {
    /// The new patient, with its generated id
    pub record: PatientRecord,
    /// The billing account opened for it
    pub account: BillingAccount,
    /// Whether the broker acknowledged the `PATIENT_CREATED` event
    pub announced: bool,
}

/// Patient operations wired to billing and the event producer.
#[derive(Debug, Clone)]
pub struct PatientRegistration {
    billing: BillingClient,
    producer: PatientEventProducer,
}

impl PatientRegistration {
    /// Create the service.
    #[must_use]
    pub const fn new(billing: BillingClient, producer: PatientEventProducer) -> Self {
        Self { billing, producer }
    }

    /// Register a new patient under a freshly generated id.
    ///
    /// Name and email may be empty; the billing service decides whether it
    /// accepts them.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Billing`] if the billing account cannot be opened.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
    ) -> Result<RegisteredPatient, RegistrationError> {
        let record = PatientRecord::new(uuid::Uuid::new_v4().to_string(), name, email);
        tracing::info!(patient_id = %record.patient_id, "Registering patient");

        let account = self
            .billing
            .create_billing_account(&record.patient_id, &record.name, &record.email)
            .await?;

        let announced = self
            .producer
            .publish_best_effort(&record, EventType::Created)
            .await
            .is_some();

        Ok(RegisteredPatient {
            record,
            account,
            announced,
        })
    }

    /// Announce changed patient details. Returns whether the broker acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidPatient`] if the record has no id.
    pub async fn update(&self, record: &PatientRecord) -> Result<bool, RegistrationError> {
        require_id(&record.patient_id)?;
        Ok(self
            .producer
            .publish_best_effort(record, EventType::Updated)
            .await
            .is_some())
    }

    /// Announce that a patient was removed. Returns whether the broker acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidPatient`] if `patient_id` is blank.
    pub async fn delete(&self, patient_id: &str) -> Result<bool, RegistrationError> {
        require_id(patient_id)?;
        let record = PatientRecord::new(patient_id, "", "");
        Ok(self
            .producer
            .publish_best_effort(&record, EventType::Deleted)
            .await
            .is_some())
    }
}

fn require_id(patient_id: &str) -> Result<(), RegistrationError> {
    if patient_id.trim().is_empty() {
        Err(RegistrationError::InvalidPatient("patient id must not be blank"))
    } else {
        Ok(())
    }
}
