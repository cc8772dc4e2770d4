//! `EventConsumer`: a standing subscription that dispatches patient events.
//!
//! # Overview
//!
//! The consumer owns one subscription identified by `(topic, consumer_group)`:
//! - Subscribes through an [`EventBus`] (Redpanda in production, in-memory in tests)
//! - Decodes each payload into a [`PatientEvent`]
//! - Dispatches decoded events to an [`EventHandler`]
//! - Commits the offset once the message is dealt with
//!
//! # Delivery
//!
//! Offsets are committed **after** the handler returns, so a crash between handling
//! and commit redelivers the message (at-least-once). Handlers must be idempotent.
//!
//! Messages that cannot be decoded are logged, counted and committed without reaching
//! the handler. Handler failures are retried with the consumer's [`RetryPolicy`]; a
//! message whose handler keeps failing is logged, counted as failed and committed.
//!
//! # Example
//!
//! ```ignore
//! let (mut consumer, shutdown) = EventConsumer::new(
//!     AnalyticsHandler,
//!     bus,
//!     PATIENT_TOPIC,
//!     ANALYTICS_CONSUMER_GROUP,
//! );
//!
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     shutdown.send(true).ok();
//! });
//!
//! consumer.run().await?;
//! ```

use crate::retry::{RetryPolicy, Retryable, retry};
use carebridge_core::envelope::PatientEvent;
use carebridge_core::event_bus::{
    EventBus, EventBusError, IncomingMessage, OffsetReset, Subscription,
};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Failure reported by an [`EventHandler`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Worth another attempt (downstream timeout, lock contention).
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// Will fail again for the same event.
    #[error("Permanent handler failure: {0}")]
    Permanent(String),
}

impl Retryable for HandlerError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors that stop the consumer.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// The bus refused the subscription.
    #[error("Failed to subscribe: {0}")]
    Subscribe(#[source] EventBusError),
}

/// Business logic invoked for every decoded envelope.
///
/// May be called more than once for the same event.
pub trait EventHandler: Send + Sync + 'static {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Handle one decoded event.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Transient`] to request a retry,
    /// [`HandlerError::Permanent`] to give up on this event.
    fn handle(&self, event: &PatientEvent) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

/// Running totals for one consumer.
///
/// Shared with the consumer task; read it at any time through
/// [`EventConsumer::stats`].
#[derive(Debug, Default)]
pub struct ConsumerStats {
    processed: AtomicU64,
    malformed: AtomicU64,
    failed: AtomicU64,
}

impl ConsumerStats {
    /// Messages the handler accepted.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages dropped because they could not be decoded.
    #[must_use]
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Messages whose handler failed after all retries.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

enum Outcome {
    Processed,
    Malformed,
    Failed,
}

/// Subscribes to a topic under a consumer group and feeds an [`EventHandler`].
///
/// Messages are handled one at a time, in delivery order.
pub struct EventConsumer<H>
where
    H: EventHandler,
{
    handler: Arc<H>,
    event_bus: Arc<dyn EventBus>,
    subscription: Subscription,
    retry: RetryPolicy,
    stats: Arc<ConsumerStats>,
    shutdown: watch::Receiver<bool>,
}

impl<H> EventConsumer<H>
where
    H: EventHandler,
{
    /// Create a consumer for `topic` in `consumer_group`.
    ///
    /// Returns the consumer and a shutdown sender. Send `true` to stop
    /// [`run`](Self::run) after the message in flight.
    ///
    /// Defaults: new groups start from the latest offset; transient handler
    /// failures are retried 3 times.
    #[must_use]
    pub fn new(
        handler: H,
        event_bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = Self {
            handler: Arc::new(handler),
            event_bus,
            subscription: Subscription::new(topic, consumer_group),
            retry: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(50))
                .build(),
            stats: Arc::new(ConsumerStats::default()),
            shutdown: shutdown_rx,
        };

        (consumer, shutdown_tx)
    }

    /// Where a group with no committed offset starts reading.
    #[must_use]
    pub fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.subscription = self.subscription.with_offset_reset(offset_reset);
        self
    }

    /// Replace the handler retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Live counters for this consumer.
    #[must_use]
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// The handler this consumer dispatches to.
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Subscribe and process messages until shutdown or end of stream.
    ///
    /// Per-message failures never stop the loop.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscribe`] if the subscription cannot be created.
    #[allow(clippy::cognitive_complexity)]
    pub async fn run(&mut self) -> Result<(), ConsumerError> {
        let handler_name = self.handler.name().to_string();
        let topics = self.subscription.topics().join(",");
        let consumer_group = self.subscription.consumer_group().to_string();

        tracing::info!(
            handler = %handler_name,
            topics = %topics,
            consumer_group = %consumer_group,
            offset_reset = %self.subscription.offset_reset(),
            "Starting event consumer"
        );

        let mut stream = self
            .event_bus
            .subscribe(&self.subscription)
            .await
            .map_err(ConsumerError::Subscribe)?;

        // A dropped sender means nobody can ask us to stop; keep consuming.
        let mut shutdown_open = true;

        while !*self.shutdown.borrow() {
            tokio::select! {
                biased;

                changed = self.shutdown.changed(), if shutdown_open => {
                    if changed.is_err() {
                        shutdown_open = false;
                    } else if *self.shutdown.borrow() {
                        tracing::info!(handler = %handler_name, "Shutdown signal received");
                        break;
                    }
                }

                next = stream.next() => match next {
                    Some(Ok(message)) => self.process_message(&message).await,
                    Some(Err(e)) => {
                        tracing::error!(
                            handler = %handler_name,
                            error = %e,
                            "Error receiving message from bus"
                        );
                    }
                    None => {
                        tracing::info!(handler = %handler_name, "Subscription stream ended");
                        break;
                    }
                },
            }
        }

        tracing::info!(
            handler = %handler_name,
            processed = self.stats.processed(),
            malformed = self.stats.malformed(),
            failed = self.stats.failed(),
            "Event consumer stopped"
        );
        Ok(())
    }

    async fn process_message(&self, message: &IncomingMessage) {
        let outcome = self.dispatch(message).await;

        let counter = match outcome {
            Outcome::Processed => &self.stats.processed,
            Outcome::Malformed => &self.stats.malformed,
            Outcome::Failed => &self.stats.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        // Not fatal: the message is redelivered and the handler sees it again.
        if let Err(e) = message.commit() {
            tracing::warn!(
                topic = %message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Failed to commit offset"
            );
        }
    }

    async fn dispatch(&self, message: &IncomingMessage) -> Outcome {
        let Some(payload) = message.payload() else {
            tracing::error!(
                topic = %message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "Dropping message without payload"
            );
            return Outcome::Malformed;
        };

        let event = match PatientEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    topic = %message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    payload_len = payload.len(),
                    error = %e,
                    "Error deserializing patient event"
                );
                return Outcome::Malformed;
            }
        };

        let handler = &self.handler;
        let result = retry(&self.retry, handler.name(), || handler.handle(&event)).await;

        match result {
            Ok(()) => Outcome::Processed,
            Err(e) => {
                tracing::error!(
                    handler = %handler.name(),
                    patient_id = %event.patient_id(),
                    event_type = %event.event_type(),
                    offset = message.offset(),
                    error = %e,
                    "Handler failed, skipping event"
                );
                Outcome::Failed
            }
        }
    }
}
