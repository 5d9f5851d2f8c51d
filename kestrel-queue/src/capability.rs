use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use kestrel_core::StorageResult;

/// Largest batch a single poll may request
pub const MAX_POLL_COUNT: usize = 32;

/// A message as delivered by the queue service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawQueueMessage {
    pub message_id: String,
    /// Opaque receipt required to delete or update this delivery
    pub pop_receipt: String,
    pub payload: Vec<u8>,
    /// Deliveries so far, including this one
    pub dequeue_count: u32,
    pub inserted_at: DateTime<Utc>,
    pub next_visible_at: DateTime<Utc>,
}

/// Queue service primitives.
///
/// A polled message stays invisible to other pollers for the visibility
/// timeout; if it is not deleted by then it is delivered again with a higher
/// dequeue count.
#[async_trait]
pub trait QueueCapability: Send + Sync {
    /// Returns `true` when the queue was created
    async fn create_queue_if_not_exists(&self, queue: &str) -> StorageResult<bool>;

    async fn put(&self, queue: &str, payload: Vec<u8>) -> StorageResult<()>;

    /// Receive up to `max_count` (1..=32) visible messages in delivery order
    async fn poll(
        &self,
        queue: &str,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> StorageResult<Vec<RawQueueMessage>>;

    async fn delete(&self, queue: &str, message_id: &str, pop_receipt: &str) -> StorageResult<()>;

    /// Replace the payload and extend invisibility. Returns the new pop receipt.
    async fn update(
        &self,
        queue: &str,
        message_id: &str,
        pop_receipt: &str,
        payload: Vec<u8>,
        visibility_timeout: Duration,
    ) -> StorageResult<String>;

    /// Remove every message
    async fn clear(&self, queue: &str) -> StorageResult<()>;
}
