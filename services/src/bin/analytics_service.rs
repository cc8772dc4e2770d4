//! analytics-service: logs every patient event on the patient topic.
//!
//! ## Configuration
//! - `BROKER_BOOTSTRAP`: Kafka bootstrap servers (default: localhost:9092)
//! - `PATIENT_TOPIC`: topic to consume (default: patient)
//! - `ANALYTICS_CONSUMER_GROUP`: consumer group (default: analytics-service)
//! - `BROKER_AUTO_OFFSET_RESET`: `earliest` or `latest` (default: earliest)

use carebridge_redpanda::RedpandaEventBus;
use carebridge_runtime::EventConsumer;
use carebridge_services::{AnalyticsHandler, Config, init_tracing};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config.log)?;

    info!(
        brokers = %config.broker.bootstrap,
        topic = %config.broker.patient_topic,
        consumer_group = %config.broker.analytics_group,
        "Starting analytics service"
    );

    let event_bus = Arc::new(RedpandaEventBus::new(&config.broker.bootstrap)?);
    let (consumer, shutdown) = EventConsumer::new(
        AnalyticsHandler,
        event_bus,
        config.broker.patient_topic.clone(),
        config.broker.analytics_group.clone(),
    );
    let mut consumer = consumer.with_offset_reset(config.broker.offset_reset);
    let stats = consumer.stats();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.send(true).ok();
        }
    });

    consumer.run().await?;

    info!(
        processed = stats.processed(),
        malformed = stats.malformed(),
        failed = stats.failed(),
        "Analytics service stopped"
    );
    Ok(())
}
