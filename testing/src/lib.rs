//! # Carebridge Testing
//!
//! Testing utilities for the Carebridge event relay.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a Kafka-like [`EventBus`](carebridge_core::event_bus::EventBus)
//!   with partitions, consumer groups and committed offsets
//! - [`helpers`]: stream and tracing helpers shared by the integration tests
//!
//! ## Example
//!
//! ```ignore
//! use carebridge_testing::InMemoryBroker;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn consumer_sees_published_event() {
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let producer = PatientEventProducer::new(broker.clone(), "patient");
//!     // ...
//! }
//! ```

pub mod broker;

/// Test helpers and utilities.
pub mod helpers {
    use carebridge_core::event_bus::{IncomingMessage, MessageStream};
    use futures::StreamExt;
    use std::time::Duration;

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Pull up to `count` messages, giving up once `idle` passes without a new one.
    ///
    /// Transport errors on the stream are skipped.
    pub async fn take_messages(
        stream: &mut MessageStream,
        count: usize,
        idle: Duration,
    ) -> Vec<IncomingMessage> {
        let mut messages = Vec::with_capacity(count);
        while messages.len() < count {
            match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(Ok(message))) => messages.push(message),
                Ok(Some(Err(e))) => tracing::debug!(error = %e, "Skipping stream error"),
                Ok(None) | Err(_) => break,
            }
        }
        messages
    }

    /// Poll `condition` every 10ms until it holds or `timeout` passes.
    ///
    /// Returns whether the condition was met.
    pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub use broker::InMemoryBroker;
pub use helpers::{init_test_tracing, take_messages, wait_until};
