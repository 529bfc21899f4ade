use async_trait::async_trait;

use crate::error::Result;
use crate::events::EventEnvelope;

/// Publish-only fan-out channel for workflow and generation events.
///
/// Delivery is best-effort, at-most-once; the core never blocks on a
/// subscriber.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EventEnvelope) -> Result<()>;
}
