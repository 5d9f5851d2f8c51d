use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{QueueError, QueueResult, UpdateableQueue};

/// Identifies one delivery of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub message_id: String,
    pub pop_receipt: String,
}

/// A typed message received from a queue.
///
/// Carries a handle to the queue it came from so a command can checkpoint
/// payload changes with [`update_queue_message`](Self::update_queue_message).
pub struct QueueMessage<T> {
    pub payload: T,
    dequeue_count: u32,
    receipt: MessageReceipt,
    inserted_at: DateTime<Utc>,
    origin: Option<Arc<dyn UpdateableQueue<T>>>,
}

impl<T> QueueMessage<T> {
    /// Create an unbound message
    pub fn new(
        payload: T,
        dequeue_count: u32,
        receipt: MessageReceipt,
        inserted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            payload,
            dequeue_count,
            receipt,
            inserted_at,
            origin: None,
        }
    }

    /// Create a message already bound to the queue that delivered it
    pub fn bound(
        payload: T,
        dequeue_count: u32,
        receipt: MessageReceipt,
        inserted_at: DateTime<Utc>,
        origin: Arc<dyn UpdateableQueue<T>>,
    ) -> Self {
        Self {
            payload,
            dequeue_count,
            receipt,
            inserted_at,
            origin: Some(origin),
        }
    }

    pub fn dequeue_count(&self) -> u32 {
        self.dequeue_count
    }

    pub fn message_id(&self) -> &str {
        &self.receipt.message_id
    }

    pub fn receipt(&self) -> &MessageReceipt {
        &self.receipt
    }

    pub fn inserted_at(&self) -> DateTime<Utc> {
        self.inserted_at
    }

    pub fn is_bound(&self) -> bool {
        self.origin.is_some()
    }

    /// Attach the origin queue. A message can be bound only once.
    pub fn bind_origin(&mut self, origin: Arc<dyn UpdateableQueue<T>>) -> QueueResult<()> {
        if self.origin.is_some() {
            return Err(QueueError::invalid_operation(format!(
                "message {} is already bound to a queue",
                self.receipt.message_id
            )));
        }
        self.origin = Some(origin);
        Ok(())
    }

    /// Persist the current payload to the origin queue
    pub async fn update_queue_message(&mut self) -> QueueResult<()> {
        let origin = self.origin.clone().ok_or_else(|| {
            QueueError::invalid_operation(format!(
                "message {} has no origin queue to update",
                self.receipt.message_id
            ))
        })?;
        origin.update_message(self).await
    }

    /// Record the receipt issued by an update
    pub(crate) fn set_pop_receipt(&mut self, pop_receipt: String) {
        self.receipt.pop_receipt = pop_receipt;
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for QueueMessage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueMessage")
            .field("payload", &self.payload)
            .field("dequeue_count", &self.dequeue_count)
            .field("receipt", &self.receipt)
            .field("bound", &self.origin.is_some())
            .finish()
    }
}
