//! # Carebridge Runtime
//!
//! The moving parts of the patient event relay.
//!
//! ## Core Components
//!
//! - **Producer**: [`PatientEventProducer`] encodes records and publishes them keyed by
//!   patient id
//! - **Consumer**: [`EventConsumer`] subscribes under a consumer group and dispatches
//!   decoded envelopes to an [`EventHandler`]
//! - **Retry**: [`RetryPolicy`] shared by both, and by the billing client
//!
//! Both ends talk to the broker through [`carebridge_core::EventBus`], so the same code
//! runs against Redpanda and against the in-memory broker used in tests.
//!
//! ## Example
//!
//! ```ignore
//! use carebridge_core::{EventType, PATIENT_TOPIC, PatientRecord};
//! use carebridge_runtime::PatientEventProducer;
//!
//! let producer = PatientEventProducer::new(bus, PATIENT_TOPIC);
//! producer
//!     .publish_best_effort(&PatientRecord::new("p1", "Alice", "a@x.com"), EventType::Created)
//!     .await;
//! ```

pub mod consumer;
pub mod producer;
pub mod retry;

pub use consumer::{ConsumerError, ConsumerStats, EventConsumer, EventHandler, HandlerError};
pub use producer::{PatientEventProducer, PublishError};
pub use retry::{RetryPolicy, RetryPolicyBuilder, Retryable};
