//! # Carebridge Services
//!
//! Wiring for the three Carebridge processes:
//!
//! - `billing-service`: serves `billing.BillingService` on the configured port
//! - `analytics-service`: consumes the `patient` topic and logs every event
//! - `patient-service`: command-line patient registration, update and deletion
//!
//! The library half holds what the binaries share: [`config`], [`telemetry`],
//! the [`analytics`] handler and the [`registration`] workflow.

pub mod analytics;
pub mod config;
pub mod registration;
pub mod telemetry;

pub use analytics::AnalyticsHandler;
pub use config::{Config, ConfigError, LogFormat, ProvisionerKind};
pub use registration::{PatientRegistration, RegisteredPatient, RegistrationError};
pub use telemetry::init_tracing;
