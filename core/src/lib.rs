//! # Carebridge Core
//!
//! Shared types for the patient event relay.
//!
//! - [`record`]: the [`PatientRecord`](record::PatientRecord) the domain layer publishes
//! - [`envelope`]: the immutable [`PatientEvent`](envelope::PatientEvent) and its binary codec
//! - [`event_bus`]: the [`EventBus`](event_bus::EventBus) trait implemented by brokers
//!
//! The producer, consumer and broker adapters live in sibling crates and meet here.

pub mod envelope;
pub mod event_bus;
pub mod record;

/// Topic the patient service publishes to.
pub const PATIENT_TOPIC: &str = "patient";

/// Consumer group of the analytics service.
pub const ANALYTICS_CONSUMER_GROUP: &str = "analytics-service";

pub use envelope::{EnvelopeError, EventType, PatientEvent};
pub use event_bus::{
    EventBus, EventBusError, IncomingMessage, MessageStream, OffsetReset, OutboundMessage,
    PublishReceipt, Subscription,
};
pub use record::PatientRecord;
