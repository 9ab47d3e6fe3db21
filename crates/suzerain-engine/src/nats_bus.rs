//! NATS-backed lifecycle event bus.
//!
//! # Subject Convention
//!
//! - **Phase complete:** `session.{id}.phase`
//! - **Cycle complete:** `session.{id}.cycle`
//! - **Session complete:** `session.{id}.complete`
//!
//! Payloads are the JSON encoding of [`LifecycleEvent`]. Publishing is
//! fire-and-forget: failures are logged and never reach the scheduler.

use async_trait::async_trait;
use suzerain_core::store::EventBus;
use suzerain_types::{LifecycleEvent, SessionId};
use tracing::{debug, warn};

/// Subject an event is published on.
pub fn subject_for(session_id: SessionId, topic: &str) -> String {
    format!("session.{session_id}.{topic}")
}

/// An [`EventBus`] that publishes to NATS.
pub struct NatsEventBus {
    client: async_nats::Client,
}

impl NatsEventBus {
    /// Wrap an existing client.
    pub const fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns the connection error if the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, async_nats::ConnectError> {
        let client = async_nats::connect(url).await?;
        Ok(Self::new(client))
    }

    /// Flush anything still buffered.
    pub async fn flush(&self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "NATS flush failed");
        }
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, event: &LifecycleEvent) {
        let subject = subject_for(event.session_id(), event.topic());
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subject, error = %e, "Failed to serialize lifecycle event");
                return;
            }
        };

        match self.client.publish(subject.clone(), payload.into()).await {
            Ok(()) => debug!(subject, "Published lifecycle event"),
            Err(e) => warn!(subject, error = %e, "Failed to publish lifecycle event"),
        }
    }
}
