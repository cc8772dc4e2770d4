//! Publishing patient events to the broker.
//!
//! [`PatientEventProducer`] turns a [`PatientRecord`] into a [`PatientEvent`]
//! envelope and publishes it keyed by patient id, so every event for one patient
//! lands on the same partition in publish order.
//!
//! Two entry points with different failure contracts:
//!
//! - [`PatientEventProducer::publish`] returns a [`PublishError`] the caller must handle.
//! - [`PatientEventProducer::publish_best_effort`] logs failures and returns nothing.
//!   A broker outage never fails the domain operation that triggered the event.
//!
//! # Example
//!
//! ```ignore
//! let producer = PatientEventProducer::new(bus, PATIENT_TOPIC)
//!     .with_retry(RetryPolicy::default());
//!
//! let record = PatientRecord::new("p1", "Alice", "a@x.com");
//! let receipt = producer.publish(&record, EventType::Created).await?;
//! tracing::info!(partition = receipt.partition, offset = receipt.offset, "Published");
//! ```

use crate::retry::{RetryPolicy, Retryable, retry};
use carebridge_core::envelope::{EnvelopeError, EventType, PatientEvent};
use carebridge_core::event_bus::{EventBus, EventBusError, OutboundMessage, PublishReceipt};
use carebridge_core::record::PatientRecord;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Why a publish did not reach the broker.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The record cannot form a valid envelope (empty patient id).
    #[error("Invalid patient record: {0}")]
    InvalidRecord(EnvelopeError),

    /// The envelope could not be serialized.
    #[error("Failed to encode patient event: {0}")]
    Encode(EnvelopeError),

    /// The broker rejected or never acknowledged the message.
    #[error("Failed to publish patient event: {0}")]
    Transport(#[from] EventBusError),
}

impl Retryable for PublishError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_transient())
    }
}

/// Publishes [`PatientEvent`] envelopes to one topic.
///
/// Cheap to clone; clones share the underlying bus connection.
#[derive(Clone)]
pub struct PatientEventProducer {
    bus: Arc<dyn EventBus>,
    topic: String,
    retry: Option<RetryPolicy>,
}

impl PatientEventProducer {
    /// Create a producer for `topic` without retries.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            retry: None,
        }
    }

    /// Retry transient transport failures with `policy` before giving up.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Topic this producer publishes to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encode `record` as an `event_type` envelope and publish it.
    ///
    /// # Errors
    ///
    /// - [`PublishError::InvalidRecord`] if the patient id is empty
    /// - [`PublishError::Encode`] if serialization fails
    /// - [`PublishError::Transport`] if the broker does not acknowledge the message
    ///   (after retries, when a policy is configured)
    pub async fn publish(
        &self,
        record: &PatientRecord,
        event_type: EventType,
    ) -> Result<PublishReceipt, PublishError> {
        let event =
            PatientEvent::from_record(record, event_type).map_err(PublishError::InvalidRecord)?;
        let payload = event.encode().map_err(PublishError::Encode)?;
        let key = event.patient_id().as_bytes().to_vec();

        let send = || {
            let message = OutboundMessage::keyed(key.clone(), payload.clone());
            async move {
                self.bus
                    .publish(&self.topic, message)
                    .await
                    .map_err(PublishError::from)
            }
        };

        let receipt = match &self.retry {
            Some(policy) => retry(policy, "publish_patient_event", send).await?,
            None => send().await?,
        };

        tracing::debug!(
            topic = %receipt.topic,
            partition = receipt.partition,
            offset = receipt.offset,
            patient_id = %event.patient_id(),
            event_type = %event_type,
            "Patient event published"
        );
        Ok(receipt)
    }

    /// Publish and log the outcome; never fails.
    ///
    /// Returns the receipt when the broker acknowledged the event.
    pub async fn publish_best_effort(
        &self,
        record: &PatientRecord,
        event_type: EventType,
    ) -> Option<PublishReceipt> {
        match self.publish(record, event_type).await {
            Ok(receipt) => {
                tracing::info!(
                    patient_id = %record.patient_id,
                    event_type = %event_type,
                    topic = %receipt.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Sent patient event"
                );
                Some(receipt)
            }
            Err(e) => {
                tracing::error!(
                    patient_id = %record.patient_id,
                    event_type = %event_type,
                    topic = %self.topic,
                    error = %e,
                    "Error sending patient event"
                );
                None
            }
        }
    }

    /// Spawn [`publish_best_effort`](Self::publish_best_effort) on the runtime.
    ///
    /// The caller is never held up by broker backpressure. Awaiting the handle is
    /// optional.
    pub fn publish_detached(&self, record: PatientRecord, event_type: EventType) -> JoinHandle<()> {
        let producer = self.clone();
        tokio::spawn(async move {
            producer.publish_best_effort(&record, event_type).await;
        })
    }
}

impl std::fmt::Debug for PatientEventProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatientEventProducer")
            .field("topic", &self.topic)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use carebridge_core::event_bus::{MessageStream, Subscription};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` publishes with the given error, then records.
    struct ScriptedBus {
        failures: u32,
        error: EventBusError,
        attempts: AtomicU32,
        sent: Mutex<Vec<(String, OutboundMessage)>>,
    }

    impl ScriptedBus {
        fn new(failures: u32, error: EventBusError) -> Self {
            Self {
                failures,
                error,
                attempts: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl EventBus for ScriptedBus {
        fn publish(
            &self,
            topic: &str,
            message: OutboundMessage,
        ) -> Pin<Box<dyn Future<Output = Result<PublishReceipt, EventBusError>> + Send + '_>>
        {
            let topic = topic.to_string();
            Box::pin(async move {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < self.failures {
                    return Err(self.error.clone());
                }
                let mut sent = self.sent.lock().expect("lock");
                sent.push((topic.clone(), message));
                Ok(PublishReceipt {
                    topic,
                    partition: 0,
                    offset: i64::try_from(sent.len() - 1).expect("offset"),
                })
            })
        }

        fn subscribe(
            &self,
            subscription: &Subscription,
        ) -> Pin<Box<dyn Future<Output = Result<MessageStream, EventBusError>> + Send + '_>>
        {
            let topics = subscription.topics().to_vec();
            Box::pin(async move {
                Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "publish-only".to_string(),
                })
            })
        }
    }

    fn alice() -> PatientRecord {
        PatientRecord::new("p1", "Alice", "a@x.com")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(1))
            .jitter(false)
            .build()
    }

    fn unavailable() -> EventBusError {
        EventBusError::TransportError("broker unavailable".to_string())
    }

    #[tokio::test]
    async fn publish_keys_by_patient_id() {
        let bus = Arc::new(ScriptedBus::new(0, unavailable()));
        let producer = PatientEventProducer::new(bus.clone(), "patient");

        let receipt = producer
            .publish(&alice(), EventType::Created)
            .await
            .expect("publish");
        assert_eq!(receipt.topic, "patient");

        let sent = bus.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "patient");
        assert_eq!(sent[0].1.key.as_deref(), Some(&b"p1"[..]));

        let event = PatientEvent::decode(&sent[0].1.payload).expect("decode");
        assert_eq!(event.patient_id(), "p1");
        assert_eq!(event.event_type(), EventType::Created);
    }

    #[tokio::test]
    async fn empty_patient_id_never_reaches_the_bus() {
        let bus = Arc::new(ScriptedBus::new(0, unavailable()));
        let producer = PatientEventProducer::new(bus.clone(), "patient");

        let result = producer
            .publish(&PatientRecord::new("", "Nobody", ""), EventType::Created)
            .await;

        assert!(matches!(result, Err(PublishError::InvalidRecord(_))));
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_record_fails_to_encode() {
        let bus = Arc::new(ScriptedBus::new(0, unavailable()));
        let producer = PatientEventProducer::new(bus.clone(), "patient");
        let record = PatientRecord::new("p1", "x".repeat(70 * 1024), "a@x.com");

        let result = producer.publish(&record, EventType::Created).await;
        assert!(matches!(result, Err(PublishError::Encode(EnvelopeError::Encode(_)))));

        assert!(producer.publish_best_effort(&record, EventType::Created).await.is_none());
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transport_failure_without_retry_is_returned() {
        let bus = Arc::new(ScriptedBus::new(1, unavailable()));
        let producer = PatientEventProducer::new(bus.clone(), "patient");

        let result = producer.publish(&alice(), EventType::Created).await;

        assert!(matches!(result, Err(PublishError::Transport(_))));
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let bus = Arc::new(ScriptedBus::new(2, unavailable()));
        let producer = PatientEventProducer::new(bus.clone(), "patient").with_retry(fast_retry());

        producer
            .publish(&alice(), EventType::Updated)
            .await
            .expect("publish after retries");
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_topic_is_not_retried() {
        let bus = Arc::new(ScriptedBus::new(
            10,
            EventBusError::InvalidTopic(String::new()),
        ));
        let producer = PatientEventProducer::new(bus.clone(), "patient").with_retry(fast_retry());

        let result = producer.publish(&alice(), EventType::Created).await;

        assert!(matches!(result, Err(PublishError::Transport(EventBusError::InvalidTopic(_)))));
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn best_effort_swallows_outage() {
        let bus = Arc::new(ScriptedBus::new(u32::MAX, unavailable()));
        let producer = PatientEventProducer::new(bus, "patient");

        assert!(producer.publish_best_effort(&alice(), EventType::Created).await.is_none());
    }

    #[tokio::test]
    async fn detached_publish_completes_in_background() {
        let bus = Arc::new(ScriptedBus::new(0, unavailable()));
        let producer = PatientEventProducer::new(bus.clone(), "patient");

        producer
            .publish_detached(alice(), EventType::Deleted)
            .await
            .expect("join");

        assert_eq!(bus.sent.lock().expect("lock").len(), 1);
    }
}
