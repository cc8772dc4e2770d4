//! The patient record handed to the producer by the domain layer.

use std::fmt;

/// A patient as the patient service knows it.
///
/// `patient_id` must be non-empty before the record can be published; `name` and
/// `email` may be empty but are always present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatientRecord {
    /// Stable patient identifier.
    pub patient_id: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
}

impl PatientRecord {
    /// Create a record.
    #[must_use]
    pub fn new(
        patient_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for PatientRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Patient {{ id: {} }}", self.patient_id)
    }
}
