//! Billing client against an in-process server on a free local port.

#![allow(clippy::expect_used)]

use carebridge_billing::proto::billing_service_server::{BillingService, BillingServiceServer};
use carebridge_billing::proto::{BillingRequest, BillingResponse, BillingStatus};
use carebridge_billing::{
    AccountProvisioner, AccountRequest, AccountStatus, BillingAccount, BillingClient,
    BillingClientConfig, BillingClientError, PlaceholderProvisioner, ProvisionError,
    RegistryProvisioner, serve_with_listener,
};
use carebridge_runtime::RetryPolicy;
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Endpoint;
use tonic::{Code, Request, Response, Status};
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(provisioner: Arc<dyn AccountProvisioner>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            serve_with_listener(listener, provisioner, async {
                let _ = rx.await;
            })
            .await
            .expect("serve");
        });
        Self {
            addr,
            shutdown: Some(tx),
        }
    }

    fn config(&self) -> BillingClientConfig {
        BillingClientConfig::new(self.addr.ip().to_string(), self.addr.port())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Sleeps before answering.
struct Slow(Duration);

impl AccountProvisioner for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn provision<'a>(
        &'a self,
        _request: &'a AccountRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BillingAccount, ProvisionError>> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.0).await;
            Ok(BillingAccount {
                account_id: "slow-1".to_string(),
                status: AccountStatus::Pending,
            })
        })
    }
}

/// Unavailable for the first `failures` calls.
struct Recovering {
    failures: u32,
    calls: AtomicU32,
}

impl AccountProvisioner for Recovering {
    fn name(&self) -> &'static str {
        "recovering"
    }

    fn provision<'a>(
        &'a self,
        _request: &'a AccountRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BillingAccount, ProvisionError>> + Send + 'a>> {
        Box::pin(async move {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(ProvisionError::Unavailable("warming up".to_string()));
            }
            Ok(BillingAccount {
                account_id: "acct-recovered".to_string(),
                status: AccountStatus::Active,
            })
        })
    }
}

/// A server that answers without a usable status.
struct Unspecified;

#[tonic::async_trait]
impl BillingService for Unspecified {
    async fn create_billing_account(
        &self,
        _request: Request<BillingRequest>,
    ) -> Result<Response<BillingResponse>, Status> {
        Ok(Response::new(BillingResponse {
            account_id: "acct-1".to_string(),
            status: BillingStatus::Unspecified.into(),
        }))
    }
}

#[tokio::test]
async fn placeholder_server_returns_fixed_active_account() {
    let server = TestServer::start(Arc::new(PlaceholderProvisioner)).await;
    let client = BillingClient::connect(server.config()).await.expect("connect");

    let account = client
        .create_billing_account("p1", "Alice", "a@x.com")
        .await
        .expect("create account");

    assert_eq!(account.account_id, "12345");
    assert_eq!(account.status, AccountStatus::Active);
}

#[tokio::test]
async fn registry_server_returns_same_account_for_repeated_patient() {
    let server = TestServer::start(Arc::new(RegistryProvisioner::new())).await;
    let client = BillingClient::connect(server.config()).await.expect("connect");

    let first = client
        .create_billing_account("p1", "Alice", "a@x.com")
        .await
        .expect("first");
    let repeat = client
        .create_billing_account("p1", "Alice", "a@x.com")
        .await
        .expect("repeat");
    let other = client
        .create_billing_account("p2", "Bob", "b@x.com")
        .await
        .expect("other");

    assert!(!first.account_id.is_empty());
    assert_eq!(first, repeat);
    assert_ne!(first.account_id, other.account_id);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let server = TestServer::start(Arc::new(PlaceholderProvisioner)).await;
    let client = BillingClient::connect(server.config()).await.expect("connect");

    let missing_id = client
        .create_billing_account("", "Alice", "a@x.com")
        .await
        .expect_err("missing id");
    assert!(matches!(
        missing_id,
        BillingClientError::Rejected { code: Code::InvalidArgument, .. }
    ));

    let bad_email = client
        .create_billing_account("p1", "Alice", "alice")
        .await
        .expect_err("bad email");
    assert!(matches!(
        bad_email,
        BillingClientError::Rejected { code: Code::InvalidArgument, .. }
    ));
    assert!(!bad_email.is_transient());
}

#[tokio::test]
async fn slow_server_hits_the_deadline() {
    let server = TestServer::start(Arc::new(Slow(Duration::from_secs(3)))).await;
    let config = server.config().with_deadline(Duration::from_millis(200));
    let client = BillingClient::connect(config).await.expect("connect");

    let started = tokio::time::Instant::now();
    let err = client
        .create_billing_account("p1", "Alice", "a@x.com")
        .await
        .expect_err("deadline");

    assert_eq!(err, BillingClientError::DeadlineExceeded);
    assert!(err.is_transient());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn concurrent_calls_share_one_channel() {
    let server = TestServer::start(Arc::new(RegistryProvisioner::new())).await;
    let client = BillingClient::connect(server.config()).await.expect("connect");

    let calls = (0..20).map(|i| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .create_billing_account(&format!("p{i}"), "Patient", "p@x.com")
                .await
        })
    });

    let mut account_ids = HashSet::new();
    for call in calls {
        let account = call.await.expect("join").expect("call");
        account_ids.insert(account.account_id);
    }
    assert_eq!(account_ids.len(), 20);
}

#[tokio::test]
async fn unavailable_provisioner_is_retried_when_configured() {
    let provisioner = Arc::new(Recovering {
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let server = TestServer::start(provisioner.clone()).await;
    let config = server.config().with_retry(
        RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(5))
            .jitter(false)
            .build(),
    );
    let client = BillingClient::connect(config).await.expect("connect");

    let account = client
        .create_billing_account("p1", "Alice", "a@x.com")
        .await
        .expect("eventually succeeds");

    assert_eq!(account.account_id, "acct-recovered");
    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unreachable_service_is_reported() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    let config = BillingClientConfig::new(addr.ip().to_string(), addr.port())
        .with_deadline(Duration::from_millis(500));

    let eager = BillingClient::connect(config.clone()).await;
    assert!(matches!(eager, Err(BillingClientError::Connect(_))));

    let lazy = BillingClient::connect_lazy(config).expect("lazy client");
    let err = lazy
        .create_billing_account("p1", "Alice", "a@x.com")
        .await
        .expect_err("nobody listening");
    assert!(err.is_transient(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn unspecified_status_is_a_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(BillingServiceServer::new(Unspecified))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );

    let client = BillingClient::connect(BillingClientConfig::new(
        addr.ip().to_string(),
        addr.port(),
    ))
    .await
    .expect("connect");

    let err = client
        .create_billing_account("p1", "Alice", "a@x.com")
        .await
        .expect_err("unspecified status");
    assert!(matches!(err, BillingClientError::Protocol(_)));
}

#[tokio::test]
async fn health_service_reports_billing_as_serving() {
    let server = TestServer::start(Arc::new(PlaceholderProvisioner)).await;
    let channel = Endpoint::from_shared(format!("http://{}", server.addr))
        .expect("endpoint")
        .connect()
        .await
        .expect("connect health");
    let mut health = HealthClient::new(channel);

    let response = health
        .check(HealthCheckRequest {
            service: "billing.BillingService".to_string(),
        })
        .await
        .expect("check")
        .into_inner();

    assert_eq!(response.status(), ServingStatus::Serving);
}
