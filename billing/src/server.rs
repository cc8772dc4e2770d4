//! gRPC server for `billing.BillingService`.
//!
//! Requests are validated, handed to an [`AccountProvisioner`] and answered with the
//! resulting account. A standard gRPC health service is served next to it.
//!
//! # Example
//!
//! ```ignore
//! let provisioner = Arc::new(PlaceholderProvisioner);
//! serve("0.0.0.0:9001".parse()?, provisioner, async {
//!     tokio::signal::ctrl_c().await.ok();
//! })
//! .await?;
//! ```

use crate::account::AccountRequest;
use crate::proto::billing_service_server::{BillingService, BillingServiceServer};
use crate::proto::{BillingRequest, BillingResponse};
use crate::provisioner::{AccountProvisioner, ProvisionError};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::transport::server::Router;
use tonic::{Request, Response, Status};

/// Errors that stop the billing server.
#[derive(Error, Debug)]
pub enum BillingServerError {
    /// The listen address could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The gRPC transport failed while serving.
    #[error("Billing server transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// `BillingService` implementation delegating to an [`AccountProvisioner`].
#[derive(Clone)]
pub struct BillingGrpcService {
    provisioner: Arc<dyn AccountProvisioner>,
}

impl BillingGrpcService {
    /// Create a service around `provisioner`.
    #[must_use]
    pub fn new(provisioner: Arc<dyn AccountProvisioner>) -> Self {
        Self { provisioner }
    }
}

impl std::fmt::Debug for BillingGrpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingGrpcService")
            .field("provisioner", &self.provisioner.name())
            .finish()
    }
}

#[tonic::async_trait]
impl BillingService for BillingGrpcService {
    async fn create_billing_account(
        &self,
        request: Request<BillingRequest>,
    ) -> Result<Response<BillingResponse>, Status> {
        let request = request.into_inner();
        tracing::info!(
            patient_id = %request.patient_id,
            provisioner = self.provisioner.name(),
            "createBillingAccount request received"
        );

        let request = AccountRequest::try_from(request).map_err(|e| {
            tracing::warn!(error = %e, "Rejecting billing request");
            Status::invalid_argument(e.to_string())
        })?;

        let account = self
            .provisioner
            .provision(&request)
            .await
            .map_err(|e| {
                tracing::error!(patient_id = %request.patient_id, error = %e, "Provisioning failed");
                match e {
                    ProvisionError::Unavailable(reason) => Status::unavailable(reason),
                    ProvisionError::Refused(reason) => Status::failed_precondition(reason),
                }
            })?;

        Ok(Response::new(BillingResponse {
            account_id: account.account_id,
            status: account.status.to_wire().into(),
        }))
    }
}

/// Router with the billing and health services, health already reporting `SERVING`.
pub async fn router(provisioner: Arc<dyn AccountProvisioner>) -> Router {
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<BillingServiceServer<BillingGrpcService>>()
        .await;

    Server::builder()
        .add_service(health_service)
        .add_service(BillingServiceServer::new(BillingGrpcService::new(provisioner)))
}

/// Bind `addr` and serve until `shutdown` completes.
///
/// # Errors
///
/// Returns [`BillingServerError::Bind`] if the address is taken, or
/// [`BillingServerError::Transport`] if serving fails.
pub async fn serve(
    addr: SocketAddr,
    provisioner: Arc<dyn AccountProvisioner>,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), BillingServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| BillingServerError::Bind { addr, source })?;
    serve_with_listener(listener, provisioner, shutdown).await
}

/// Serve on an already bound listener until `shutdown` completes.
///
/// Binding `127.0.0.1:0` and passing the listener here is how tests get a free port.
///
/// # Errors
///
/// Returns [`BillingServerError::Transport`] if serving fails.
pub async fn serve_with_listener(
    listener: TcpListener,
    provisioner: Arc<dyn AccountProvisioner>,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), BillingServerError> {
    let local_addr = listener.local_addr().ok();
    tracing::info!(
        addr = ?local_addr,
        provisioner = provisioner.name(),
        "Billing service listening"
    );

    router(provisioner)
        .await
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;

    tracing::info!("Billing service stopped");
    Ok(())
}
