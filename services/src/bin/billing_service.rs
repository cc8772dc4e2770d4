//! billing-service: serves `billing.BillingService` over gRPC.
//!
//! ## Configuration
//! - `BILLING_SERVICE_GRPC_PORT`: listen port (default: 9001)
//! - `BILLING_PROVISIONER`: `placeholder` or `registry` (default: placeholder)
//! - `CAREBRIDGE_LOG` / `CAREBRIDGE_LOG_FORMAT`: logging

use carebridge_billing::{AccountProvisioner, PlaceholderProvisioner, RegistryProvisioner, serve};
use carebridge_services::{Config, ProvisionerKind, init_tracing};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config.log)?;

    let provisioner: Arc<dyn AccountProvisioner> = match config.billing.provisioner {
        ProvisionerKind::Placeholder => Arc::new(PlaceholderProvisioner),
        ProvisionerKind::Registry => Arc::new(RegistryProvisioner::new()),
    };
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.billing.port));

    info!(%addr, provisioner = provisioner.name(), "Starting billing service");

    serve(addr, provisioner, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
    })
    .await?;

    Ok(())
}
