//! patient-service: register, update and delete patients from the command line.
//!
//! Registration opens a billing account over gRPC, then publishes
//! `PATIENT_CREATED`. Updates and deletions only publish their event.
//!
//! ```text
//! patient-service register --name Alice --email a@x.com
//! patient-service update --id <uuid> --name Alice --email alice@x.com
//! patient-service delete --id <uuid>
//! ```

use carebridge_billing::BillingClient;
use carebridge_core::record::PatientRecord;
use carebridge_redpanda::RedpandaEventBus;
use carebridge_runtime::PatientEventProducer;
use carebridge_services::{Config, PatientRegistration, init_tracing};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "patient-service", version, about = "Carebridge patient service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new patient and open its billing account
    Register {
        /// Patient name
        #[arg(long)]
        name: String,
        /// Contact email
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Publish updated details for an existing patient
    Update {
        /// Patient id
        #[arg(long)]
        id: String,
        /// Patient name
        #[arg(long)]
        name: String,
        /// Contact email
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Publish the removal of a patient
    Delete {
        /// Patient id
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config.log)?;

    let event_bus = Arc::new(RedpandaEventBus::new(&config.broker.bootstrap)?);
    let producer = PatientEventProducer::new(event_bus, config.broker.patient_topic.clone());
    let billing = BillingClient::connect_lazy(config.billing.client_config())?;
    let patients = PatientRegistration::new(billing, producer);

    let announced = match cli.command {
        Command::Register { name, email } => {
            let registered = patients.register(&name, &email).await?;
            println!(
                "{} billing_account={} status={}",
                registered.record.patient_id, registered.account.account_id, registered.account.status
            );
            registered.announced
        }
        Command::Update { id, name, email } => {
            patients
                .update(&PatientRecord::new(id, name, email))
                .await?
        }
        Command::Delete { id } => patients.delete(&id).await?,
    };

    if announced {
        info!("Patient event published");
    } else {
        warn!("Patient event was not published; see errors above");
    }
    Ok(())
}
