//! Event bus abstraction between the patient producer and its consumers.
//!
//! This module provides the [`EventBus`] trait for publishing keyed messages to a topic
//! and for subscribing to topics under a consumer group. Implementations deal in raw
//! bytes; encoding and decoding of [`PatientEvent`](crate::envelope::PatientEvent)
//! envelopes happens in the producer and consumer on either side.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Patient service │
//! └────────┬────────┘
//!          │ publish(key = patient_id)
//!          ▼
//! ┌─────────────────┐
//! │    Event Bus    │◄─── topic "patient"
//! └────────┬────────┘
//!          │
//!     ┌────┴──────────┐
//!     │               │
//!     ▼               ▼
//! ┌──────────┐   ┌──────────┐
//! │ group A  │   │ group B  │   every group sees every message,
//! │ (2 insts)│   │ (1 inst) │   members of one group split partitions
//! └──────────┘   └──────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Keyed ordering**: messages with the same key land on the same partition and keep
//!   their order
//! - **Commit after handling**: consumers call [`IncomingMessage::commit`] once a message
//!   is dealt with, giving at-least-once delivery across restarts
//! - **Idempotency**: handlers must tolerate the occasional redelivery
//!
//! # Implementations
//!
//! - `InMemoryBroker` in `carebridge-testing` - partitions and consumer groups in-process
//! - `RedpandaEventBus` in `carebridge-redpanda` - Kafka-compatible, for production

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to commit a consumed offset
    #[error("Commit failed for {topic}[{partition}]@{offset}: {reason}")]
    CommitFailed {
        /// Topic of the message
        topic: String,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// The reason for failure
        reason: String,
    },

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl EventBusError {
    /// Whether retrying the same operation might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::PublishFailed { .. } | Self::TransportError(_)
        )
    }
}

/// A message ready to be published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Partitioning key. `None` lets the broker spread messages round-robin.
    pub key: Option<Vec<u8>>,
    /// Encoded envelope.
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// A message routed by `key`.
    #[must_use]
    pub fn keyed(key: impl Into<Vec<u8>>, payload: Vec<u8>) -> Self {
        Self {
            key: Some(key.into()),
            payload,
        }
    }

    /// A message without a key.
    #[must_use]
    pub const fn unkeyed(payload: Vec<u8>) -> Self {
        Self { key: None, payload }
    }
}

/// Where a published message was stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Topic the message was written to
    pub topic: String,
    /// Partition chosen by the broker
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

/// Where a new consumer group starts reading when it has no committed offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OffsetReset {
    /// Start from the beginning of each partition
    Earliest,
    /// Only read messages published after joining
    #[default]
    Latest,
}

impl OffsetReset {
    /// Kafka configuration value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(format!("unknown offset reset policy '{other}'")),
        }
    }
}

/// A standing subscription: which topics, under which consumer group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    topics: Vec<String>,
    consumer_group: String,
    offset_reset: OffsetReset,
}

impl Subscription {
    /// Subscribe to a single topic under `consumer_group`.
    #[must_use]
    pub fn new(topic: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            topics: vec![topic.into()],
            consumer_group: consumer_group.into(),
            offset_reset: OffsetReset::default(),
        }
    }

    /// Add another topic to the subscription.
    #[must_use]
    pub fn and_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Set where the group starts when it has no committed offset.
    #[must_use]
    pub const fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }

    /// Subscribed topics.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Consumer group identity.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Offset reset policy for a fresh group.
    #[must_use]
    pub const fn offset_reset(&self) -> OffsetReset {
        self.offset_reset
    }
}

/// Records consumer progress on the broker.
///
/// Implemented by each bus; [`IncomingMessage::commit`] delegates here.
pub trait OffsetCommitter: Send + Sync {
    /// Mark the message at `offset` as processed, so the group resumes at `offset + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the broker rejects the commit.
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), EventBusError>;
}

/// A message delivered to a subscriber.
///
/// Carries the raw payload plus enough position information to commit it.
pub struct IncomingMessage {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
    committer: Arc<dyn OffsetCommitter>,
}

impl IncomingMessage {
    /// Create a delivered message. Called by bus implementations.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Vec<u8>>,
        payload: Option<Vec<u8>>,
        committer: Arc<dyn OffsetCommitter>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            payload,
            committer,
        }
    }

    /// Topic the message came from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition the message came from.
    #[must_use]
    pub const fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset within the partition.
    #[must_use]
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// Partitioning key, if the producer set one.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Message body. Kafka allows empty (tombstone) messages, hence the `Option`.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Commit this message's offset for the consumer group.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the broker rejects the commit.
    pub fn commit(&self) -> Result<(), EventBusError> {
        self.committer
            .commit(&self.topic, self.partition, self.offset)
    }
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("key_len", &self.key.as_ref().map(Vec::len))
            .field("payload_len", &self.payload.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

/// Stream of messages from a subscription.
///
/// Each item is either a delivered message or a transport error; errors do not end the
/// stream.
pub type MessageStream =
    Pin<Box<dyn Stream<Item = Result<IncomingMessage, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` so one bus can be shared by the producer
/// and any number of consumers.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the trait can be
/// used as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish a message to a topic.
    ///
    /// Messages sharing a key are written to the same partition, in publish order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] or [`EventBusError::TransportError`]
    /// if the broker does not accept the message.
    fn publish(
        &self,
        topic: &str,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<PublishReceipt, EventBusError>> + Send + '_>>;

    /// Join the subscription's consumer group and receive a stream of messages.
    ///
    /// Each consumer group receives every message; instances within one group share the
    /// topic's partitions between them. Dropping the stream leaves the group.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the group cannot be joined.
    fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, EventBusError>> + Send + '_>>;
}
