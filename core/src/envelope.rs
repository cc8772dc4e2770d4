//! Patient event envelope and its binary codec.
//!
//! A [`PatientEvent`] is the unit carried on the `patient` topic. It is built once by
//! the producer, never mutated, and decoded fresh by every consumer group.
//!
//! # Wire Format
//!
//! Envelopes are encoded with `bincode` using its default options: varint integers,
//! length-prefixed strings, trailing bytes rejected. Fields are written in declaration
//! order:
//!
//! ```text
//! patient_id (string) | name (string) | email (string) | event_type (string)
//! ```
//!
//! `event_type` travels as its wire name (`PATIENT_CREATED`, ...) rather than a variant
//! index, so reordering [`EventType`] never changes the bytes on the topic.
//!
//! # Example
//!
//! ```
//! use carebridge_core::envelope::{EventType, PatientEvent};
//!
//! let event = PatientEvent::new("p1", "Alice", "a@x.com", EventType::Created).unwrap();
//! let bytes = event.encode().unwrap();
//! assert_eq!(PatientEvent::decode(&bytes).unwrap(), event);
//! ```

use crate::record::PatientRecord;
use bincode::Options;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on an encoded envelope, enforced on both encode and decode.
///
/// Protects consumers from allocating on a corrupted length prefix.
pub const MAX_ENVELOPE_BYTES: u64 = 64 * 1024;

/// Errors produced while building, encoding or decoding an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The envelope has no patient identifier.
    #[error("Envelope is missing a patient id")]
    MissingPatientId,

    /// The envelope could not be encoded.
    #[error("Failed to encode envelope: {0}")]
    Encode(String),

    /// The bytes are not a valid envelope.
    #[error("Failed to decode envelope: {0}")]
    Decode(String),

    /// The event type name is not one of the known wire names.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// What happened to the patient.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A patient was registered.
    Created,
    /// A patient's details changed.
    Updated,
    /// A patient was removed.
    Deleted,
}

impl EventType {
    /// All event types, in declaration order.
    pub const ALL: [Self; 3] = [Self::Created, Self::Updated, Self::Deleted];

    /// The name written on the wire.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Created => "PATIENT_CREATED",
            Self::Updated => "PATIENT_UPDATED",
            Self::Deleted => "PATIENT_DELETED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for EventType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.wire_name() == s)
            .ok_or_else(|| EnvelopeError::UnknownEventType(s.to_string()))
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_name())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}

/// The binary message published on the patient topic.
///
/// Fields are private so an envelope cannot change after construction; use the
/// accessors to read it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientEvent {
    patient_id: String,
    name: String,
    email: String,
    event_type: EventType,
}

impl PatientEvent {
    /// Build an envelope from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MissingPatientId`] if `patient_id` is empty.
    pub fn new(
        patient_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        event_type: EventType,
    ) -> Result<Self, EnvelopeError> {
        let event = Self {
            patient_id: patient_id.into(),
            name: name.into(),
            email: email.into(),
            event_type,
        };
        event.validate()?;
        Ok(event)
    }

    /// Build an envelope describing `event_type` for `record`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MissingPatientId`] if the record has no identifier.
    pub fn from_record(record: &PatientRecord, event_type: EventType) -> Result<Self, EnvelopeError> {
        Self::new(
            record.patient_id.clone(),
            record.name.clone(),
            record.email.clone(),
            event_type,
        )
    }

    /// Patient identifier. Also the message key, so events for one patient stay ordered.
    #[must_use]
    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// Patient display name (may be empty).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Patient email (may be empty).
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// What happened to the patient.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Encode the envelope to its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if the encoded form would exceed
    /// [`MAX_ENVELOPE_BYTES`].
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        codec()
            .serialize(self)
            .map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Decode an envelope from wire bytes.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::Decode`] for truncated, oversized, trailing or otherwise
    ///   malformed input, including unknown event type names
    /// - [`EnvelopeError::MissingPatientId`] if the decoded envelope has no identifier
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let event: Self = codec()
            .deserialize(bytes)
            .map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), EnvelopeError> {
        if self.patient_id.is_empty() {
            return Err(EnvelopeError::MissingPatientId);
        }
        Ok(())
    }
}

impl fmt::Display for PatientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PatientEvent {{ type: {}, patient_id: {} }}",
            self.event_type, self.patient_id
        )
    }
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_ENVELOPE_BYTES)
}
