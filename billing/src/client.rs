//! Client for `billing.BillingService`.
//!
//! [`BillingClient`] wraps one HTTP/2 channel. Clones share it, and concurrent calls
//! through any clone are multiplexed as independent streams. Every call is bounded
//! by the configured deadline.
//!
//! # Example
//!
//! ```ignore
//! let client = BillingClient::connect(BillingClientConfig::default()).await?;
//! let account = client
//!     .create_billing_account("p1", "Alice", "a@x.com")
//!     .await?;
//! assert!(!account.account_id.is_empty());
//! ```

use crate::account::{AccountStatus, BillingAccount};
use crate::proto::BillingRequest;
use crate::proto::billing_service_client::BillingServiceClient;
use carebridge_runtime::retry::{RetryPolicy, Retryable, retry};
use std::time::Duration;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

/// Default billing service host.
pub const DEFAULT_ADDRESS: &str = "localhost";

/// Default billing service gRPC port.
pub const DEFAULT_PORT: u16 = 9001;

/// Default per-call deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Where the billing service lives and how long calls may take.
#[derive(Clone, Debug, PartialEq)]
pub struct BillingClientConfig {
    /// Host name or IP address
    pub address: String,
    /// gRPC port
    pub port: u16,
    /// Upper bound on a single call, including connection setup
    pub deadline: Duration,
    /// Retry policy for transient failures; `None` makes exactly one attempt
    pub retry: Option<RetryPolicy>,
}

impl Default for BillingClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            deadline: DEFAULT_DEADLINE,
            retry: None,
        }
    }
}

impl BillingClientConfig {
    /// Config for `address:port` with the default deadline and no retries.
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the per-call deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Retry transient failures with `policy`.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Plaintext `http://` URI of the service.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    fn endpoint(&self) -> Result<Endpoint, BillingClientError> {
        Endpoint::from_shared(self.uri())
            .map(|endpoint| endpoint.connect_timeout(self.deadline))
            .map_err(|e| BillingClientError::Connect(format!("invalid endpoint {}: {e}", self.uri())))
    }
}

/// Errors from a billing call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BillingClientError {
    /// The endpoint is invalid or the initial connection failed.
    #[error("Failed to connect to billing service: {0}")]
    Connect(String),

    /// The call did not complete within the deadline.
    #[error("Billing call exceeded its deadline")]
    DeadlineExceeded,

    /// The service could not be reached or is temporarily unable to answer.
    #[error("Billing service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with an error status.
    #[error("Billing service rejected the request ({code:?}): {message}")]
    Rejected {
        /// gRPC status code
        code: Code,
        /// Status message
        message: String,
    },

    /// The service answered with a response that breaks the contract.
    #[error("Invalid billing response: {0}")]
    Protocol(String),
}

impl BillingClientError {
    /// Whether another attempt might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::DeadlineExceeded | Self::Unavailable(_)
        )
    }
}

impl Retryable for BillingClientError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl From<Status> for BillingClientError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::DeadlineExceeded => Self::DeadlineExceeded,
            Code::Unavailable => Self::Unavailable(status.message().to_string()),
            code => Self::Rejected {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

/// Cloneable handle to the billing service.
#[derive(Clone, Debug)]
pub struct BillingClient {
    inner: BillingServiceClient<Channel>,
    config: BillingClientConfig,
}

impl BillingClient {
    /// Connect eagerly; fails if the service cannot be reached within the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`BillingClientError::Connect`] if the endpoint is invalid or the
    /// connection cannot be established.
    pub async fn connect(config: BillingClientConfig) -> Result<Self, BillingClientError> {
        tracing::info!(
            address = %config.address,
            port = config.port,
            "Connecting to billing service"
        );
        let channel = config
            .endpoint()?
            .connect()
            .await
            .map_err(|e| BillingClientError::Connect(format!("{}: {e}", config.uri())))?;
        Ok(Self::from_channel(channel, config))
    }

    /// Create a client that dials on first use.
    ///
    /// # Errors
    ///
    /// Returns [`BillingClientError::Connect`] if the endpoint is invalid.
    pub fn connect_lazy(config: BillingClientConfig) -> Result<Self, BillingClientError> {
        let channel = config.endpoint()?.connect_lazy();
        Ok(Self::from_channel(channel, config))
    }

    /// Wrap an existing channel.
    #[must_use]
    pub fn from_channel(channel: Channel, config: BillingClientConfig) -> Self {
        Self {
            inner: BillingServiceClient::new(channel),
            config,
        }
    }

    /// Config this client was built with.
    #[must_use]
    pub const fn config(&self) -> &BillingClientConfig {
        &self.config
    }

    /// Open a billing account for a patient.
    ///
    /// # Errors
    ///
    /// - [`BillingClientError::DeadlineExceeded`] if the call outlives the deadline
    /// - [`BillingClientError::Unavailable`] / [`BillingClientError::Connect`] if the
    ///   service cannot be reached
    /// - [`BillingClientError::Rejected`] for any other error status
    /// - [`BillingClientError::Protocol`] if the response has an empty account id or no
    ///   usable status
    ///
    /// Transient errors are retried first when the config carries a retry policy.
    pub async fn create_billing_account(
        &self,
        patient_id: &str,
        name: &str,
        email: &str,
    ) -> Result<BillingAccount, BillingClientError> {
        let request = BillingRequest {
            patient_id: patient_id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
        };

        let account = match &self.config.retry {
            Some(policy) => {
                retry(policy, "create_billing_account", || self.call_once(request.clone())).await?
            }
            None => self.call_once(request).await?,
        };

        tracing::info!(
            patient_id,
            account_id = %account.account_id,
            status = %account.status,
            "Received response from billing service"
        );
        Ok(account)
    }

    async fn call_once(&self, request: BillingRequest) -> Result<BillingAccount, BillingClientError> {
        // The channel is shared; each call gets its own stream on it. Dropping the
        // call on timeout resets that stream only.
        let mut client = self.inner.clone();
        let response = tokio::time::timeout(self.config.deadline, client.create_billing_account(request))
            .await
            .map_err(|_| BillingClientError::DeadlineExceeded)??
            .into_inner();

        if response.account_id.is_empty() {
            return Err(BillingClientError::Protocol("empty account_id".to_string()));
        }
        let status = AccountStatus::from_wire(response.status).ok_or_else(|| {
            BillingClientError::Protocol(format!("unusable status value {}", response.status))
        })?;

        Ok(BillingAccount {
            account_id: response.account_id,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_local_billing_service() {
        let config = BillingClientConfig::default();
        assert_eq!(config.uri(), "http://localhost:9001");
        assert_eq!(config.deadline, Duration::from_secs(5));
        assert!(config.retry.is_none());
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert_eq!(
            BillingClientError::from(Status::deadline_exceeded("slow")),
            BillingClientError::DeadlineExceeded
        );
        assert!(BillingClientError::from(Status::unavailable("down")).is_transient());

        let rejected = BillingClientError::from(Status::invalid_argument("bad email"));
        assert_eq!(
            rejected,
            BillingClientError::Rejected {
                code: Code::InvalidArgument,
                message: "bad email".to_string()
            }
        );
        assert!(!rejected.is_transient());
        assert!(!BillingClientError::Protocol("x".to_string()).is_transient());
    }

    #[tokio::test]
    async fn invalid_address_is_a_connect_error() {
        let result = BillingClient::connect_lazy(BillingClientConfig::new("bad host", 1));
        assert!(matches!(result, Err(BillingClientError::Connect(_))));
    }
}
