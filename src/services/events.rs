//! Event queue abstraction between the catalog and the notification consumer

use async_trait::async_trait;

use crate::{error::AppResult, models::event::CatalogEvent};

/// One message read from the queue
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue-assigned identifier, passed back to [`EventSubscription::ack`]
    pub id: String,
    pub payload: Vec<u8>,
}

/// Durable topic that catalog events are published to
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish and wait for the broker to acknowledge
    async fn publish(&self, event: &CatalogEvent) -> AppResult<()>;

    /// Join the consumer group, starting from the newest message
    async fn subscribe(&self) -> AppResult<Box<dyn EventSubscription>>;
}

/// A consumer group member
#[async_trait]
pub trait EventSubscription: Send {
    /// Wait for the next batch; an empty batch means the wait timed out
    async fn next_batch(&mut self) -> AppResult<Vec<Delivery>>;

    /// Mark deliveries as processed
    async fn ack(&mut self, ids: &[String]) -> AppResult<()>;
}
