use async_trait::async_trait;

use crate::QueueMessage;

/// Work run by a [`BatchQueueProcessor`](crate::BatchQueueProcessor).
///
/// `pre_run` and `post_run` bracket a whole batch and are called exactly once
/// per cycle, even when the poll comes back empty or every `run` fails.
#[async_trait]
pub trait BatchCommand<T>: Send + Sync {
    async fn pre_run(&self) {}

    /// Process one message. `Ok(true)` deletes it; `Ok(false)`, an error or a
    /// panic leaves it for redelivery until it turns poison.
    async fn run(&self, message: &mut QueueMessage<T>) -> anyhow::Result<bool>;

    async fn post_run(&self) {}
}
