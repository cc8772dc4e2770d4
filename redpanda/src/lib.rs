//! Redpanda event bus for Carebridge.
//!
//! Implements [`EventBus`] from `carebridge-core` on top of rdkafka, so it works with
//! Redpanda, Apache Kafka or any other Kafka-protocol broker.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Auto-commit is disabled; a message's offset is committed only when the
//!   subscriber calls [`IncomingMessage::commit`]
//! - If the subscriber stops before committing, the message is redelivered to the group
//! - Ordering is guaranteed within a partition; messages are keyed by patient id
//!
//! **Per-subscription settings** come from [`Subscription`]: the consumer group and
//! where a group without a committed offset starts reading.
//!
//! # Example
//!
//! ```no_run
//! use carebridge_core::event_bus::{EventBus, OutboundMessage, Subscription};
//! use carebridge_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:9092")?;
//!
//! event_bus
//!     .publish("patient", OutboundMessage::keyed("p1", vec![1, 2, 3]))
//!     .await?;
//!
//! let mut stream = event_bus
//!     .subscribe(&Subscription::new("patient", "analytics-service"))
//!     .await?;
//! while let Some(result) = stream.next().await {
//!     let message = result?;
//!     println!("offset {}", message.offset());
//!     message.commit()?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use carebridge_core::event_bus::{
    EventBus, EventBusError, IncomingMessage, MessageStream, OffsetCommitter, OutboundMessage,
    PublishReceipt, Subscription,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-protocol event bus.
///
/// One producer is shared by all publishes; every [`subscribe`](EventBus::subscribe)
/// call creates its own consumer that joins the subscription's consumer group.
///
/// # Example
///
/// ```no_run
/// use carebridge_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    buffer_size: usize,
}

impl RedpandaEventBus {
    /// Create an event bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers this bus connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated bootstrap servers, e.g. `"localhost:9092"`.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"` or `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// How long a publish waits for the broker acknowledgement.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Messages buffered between a Kafka consumer and its subscriber.
    ///
    /// Values below 1 are raised to 1. Default: 1000
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or the
    /// producer configuration is rejected.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            buffer_size,
        })
    }
}

/// Commits offsets through the consumer that delivered the message.
struct KafkaCommitter {
    consumer: Arc<StreamConsumer>,
}

impl OffsetCommitter for KafkaCommitter {
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), EventBusError> {
        let commit_failed = |reason: String| EventBusError::CommitFailed {
            topic: topic.to_string(),
            partition,
            offset,
            reason,
        };

        // Kafka stores the next offset to read.
        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| commit_failed(e.to_string()))?;

        self.consumer
            .commit(&positions, CommitMode::Async)
            .map_err(|e| commit_failed(e.to_string()))
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<PublishReceipt, EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let timeout = self.timeout;

        Box::pin(async move {
            if topic.is_empty() {
                return Err(EventBusError::InvalidTopic(topic));
            }

            let mut record: FutureRecord<'_, [u8], [u8]> =
                FutureRecord::to(&topic).payload(message.payload.as_slice());
            if let Some(key) = message.key.as_deref() {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        payload_len = message.payload.len(),
                        "Message published"
                    );
                    Ok(PublishReceipt {
                        topic,
                        partition,
                        offset,
                    })
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, EventBusError>> + Send + '_>> {
        let topics = subscription.topics().to_vec();
        let consumer_group = subscription.consumer_group().to_string();
        let offset_reset = subscription.offset_reset();
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;

        Box::pin(async move {
            if let Some(empty) = topics.iter().find(|t| t.is_empty()) {
                return Err(EventBusError::InvalidTopic(empty.clone()));
            }

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", offset_reset.as_str())
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group,
                offset_reset = %offset_reset,
                buffer_size,
                "Subscribed to topics"
            );

            let consumer = Arc::new(consumer);
            let committer: Arc<dyn OffsetCommitter> = Arc::new(KafkaCommitter {
                consumer: Arc::clone(&consumer),
            });
            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                loop {
                    let item = tokio::select! {
                        () = tx.closed() => break,
                        received = consumer.recv() => match received {
                            Ok(message) => Ok(IncomingMessage::new(
                                message.topic(),
                                message.partition(),
                                message.offset(),
                                message.key().map(<[u8]>::to_vec),
                                message.payload().map(<[u8]>::to_vec),
                                Arc::clone(&committer),
                            )),
                            Err(e) => Err(EventBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ))),
                        },
                    };

                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
                tracing::debug!(consumer_group = %consumer_group, "Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
