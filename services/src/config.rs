//! Configuration management for the Carebridge services.
//!
//! Loads configuration from environment variables with sensible defaults. A `.env`
//! file in the working directory is honoured.

use carebridge_billing::client::{BillingClientConfig, DEFAULT_ADDRESS, DEFAULT_PORT};
use carebridge_core::event_bus::OffsetReset;
use carebridge_core::{ANALYTICS_CONSUMER_GROUP, PATIENT_TOPIC};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// A variable was set to something unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value '{value}' for {name}: {reason}")]
pub struct ConfigError {
    /// Variable name
    pub name: &'static str,
    /// Raw value
    pub value: String,
    /// Parse failure
    pub reason: String,
}

/// Which provisioner the billing service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisionerKind {
    /// Fixed account `12345`
    #[default]
    Placeholder,
    /// One in-memory account per patient
    Registry,
}

impl FromStr for ProvisionerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "placeholder" => Ok(Self::Placeholder),
            "registry" => Ok(Self::Registry),
            other => Err(format!("expected 'placeholder' or 'registry', got '{other}'")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Broker configuration
    pub broker: BrokerConfig,
    /// Billing RPC configuration
    pub billing: BillingConfig,
    /// Logging configuration
    pub log: LogConfig,
}

/// Redpanda/Kafka configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Bootstrap servers (comma-separated)
    pub bootstrap: String,
    /// Topic patient events are published to
    pub patient_topic: String,
    /// Consumer group of the analytics service
    pub analytics_group: String,
    /// Where a new consumer group starts reading
    pub offset_reset: OffsetReset,
}

/// Billing RPC configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingConfig {
    /// Host the patient service dials
    pub address: String,
    /// gRPC port, both dialled and listened on
    pub port: u16,
    /// Per-call deadline
    pub deadline: Duration,
    /// Provisioner the billing service runs
    pub provisioner: ProvisionerKind,
}

impl BillingConfig {
    /// Client settings for dialling the billing service.
    #[must_use]
    pub fn client_config(&self) -> BillingClientConfig {
        BillingClientConfig::new(self.address.clone(), self.port).with_deadline(self.deadline)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info,carebridge_runtime=debug`
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparsable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let string = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        Ok(Self {
            broker: BrokerConfig {
                bootstrap: string("BROKER_BOOTSTRAP", "localhost:9092"),
                patient_topic: string("PATIENT_TOPIC", PATIENT_TOPIC),
                analytics_group: string("ANALYTICS_CONSUMER_GROUP", ANALYTICS_CONSUMER_GROUP),
                offset_reset: parsed(&lookup, "BROKER_AUTO_OFFSET_RESET", OffsetReset::Earliest)?,
            },
            billing: BillingConfig {
                address: string("BILLING_SERVICE_ADDRESS", DEFAULT_ADDRESS),
                port: parsed(&lookup, "BILLING_SERVICE_GRPC_PORT", DEFAULT_PORT)?,
                deadline: Duration::from_millis(parsed(&lookup, "BILLING_RPC_DEADLINE_MS", 5000)?),
                provisioner: parsed(&lookup, "BILLING_PROVISIONER", ProvisionerKind::Placeholder)?,
            },
            log: LogConfig {
                filter: string("CAREBRIDGE_LOG", "info"),
                format: parsed(&lookup, "CAREBRIDGE_LOG_FORMAT", LogFormat::Text)?,
            },
        })
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
