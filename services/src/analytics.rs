//! The analytics service's event handler.

use carebridge_core::envelope::PatientEvent;
use carebridge_runtime::consumer::{EventHandler, HandlerError};

/// Logs every patient event it receives.
///
/// Stateless, so redelivered events are harmless.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyticsHandler;

impl EventHandler for AnalyticsHandler {
    fn name(&self) -> &str {
        "analytics"
    }

    async fn handle(&self, event: &PatientEvent) -> Result<(), HandlerError> {
        tracing::info!(
            patient_id = %event.patient_id(),
            patient_name = %event.name(),
            patient_email = %event.email(),
            event_type = %event.event_type(),
            "Received patient event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebridge_core::envelope::EventType;

    #[tokio::test]
    async fn handler_accepts_every_event_type() {
        for event_type in EventType::ALL {
            let event = PatientEvent::new("p1", "Alice", "a@x.com", event_type);
            let handled = match event {
                Ok(event) => AnalyticsHandler.handle(&event).await,
                Err(e) => Err(HandlerError::Permanent(e.to_string())),
            };
            assert_eq!(handled, Ok(()));
        }
    }
}
