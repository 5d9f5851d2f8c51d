use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{QueueCapability, RawQueueMessage, MAX_POLL_COUNT};
use kestrel_core::{StorageError, StorageResult};

struct StoredMessage {
    id: String,
    pop_receipt: Option<String>,
    payload: Vec<u8>,
    dequeue_count: u32,
    inserted_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
}

/// In-memory queue service for testing and development.
///
/// Clones share state. Polls hide messages for the visibility timeout, bump
/// the dequeue count and issue a fresh pop receipt, like the remote service.
#[derive(Clone, Default)]
pub struct MemoryQueueService {
    queues: Arc<RwLock<HashMap<String, VecDeque<StoredMessage>>>>,
    injected: Arc<Mutex<VecDeque<StorageError>>>,
    requests: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
}

impl MemoryQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next calls fail with these errors, one per call, in order
    pub fn inject_failures<I: IntoIterator<Item = StorageError>>(&self, errors: I) {
        self.injected.lock().extend(errors);
    }

    /// Make every hidden message visible again, as if its timeout ran out
    pub fn expire_visibility(&self, queue: &str) {
        let now = Utc::now();
        if let Some(messages) = self.queues.write().get_mut(queue) {
            for message in messages.iter_mut() {
                if message.visible_at > now {
                    message.visible_at = now;
                }
            }
        }
    }

    /// Messages still in the queue, visible or not
    pub fn message_count(&self, queue: &str) -> usize {
        self.queues.read().get(queue).map_or(0, |messages| messages.len())
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Successful deletes
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn begin(&self) -> StorageResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.injected.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn missing_queue(queue: &str) -> StorageError {
    StorageError::not_found(format!("queue {}", queue))
}

fn to_chrono(timeout: Duration) -> StorageResult<chrono::Duration> {
    chrono::Duration::from_std(timeout)
        .map_err(|e| StorageError::invalid_argument("visibility_timeout", e.to_string()))
}

/// Locate a delivery by ID and current pop receipt
fn find_delivery<'a>(
    messages: &'a mut VecDeque<StoredMessage>,
    message_id: &str,
    pop_receipt: &str,
) -> StorageResult<(usize, &'a mut StoredMessage)> {
    let (index, message) = messages
        .iter_mut()
        .enumerate()
        .find(|(_, m)| m.id == message_id)
        .ok_or_else(|| StorageError::not_found(format!("message {}", message_id)))?;

    if message.pop_receipt.as_deref() != Some(pop_receipt) {
        return Err(StorageError::conflict(
            message_id,
            "pop receipt does not match the latest delivery",
        ));
    }
    Ok((index, message))
}

#[async_trait]
impl QueueCapability for MemoryQueueService {
    async fn create_queue_if_not_exists(&self, queue: &str) -> StorageResult<bool> {
        self.begin()?;
        let mut queues = self.queues.write();
        if queues.contains_key(queue) {
            return Ok(false);
        }
        queues.insert(queue.to_string(), VecDeque::new());
        Ok(true)
    }

    async fn put(&self, queue: &str, payload: Vec<u8>) -> StorageResult<()> {
        self.begin()?;
        let now = Utc::now();
        let mut queues = self.queues.write();
        let messages = queues.get_mut(queue).ok_or_else(|| missing_queue(queue))?;
        messages.push_back(StoredMessage {
            id: Uuid::new_v4().to_string(),
            pop_receipt: None,
            payload,
            dequeue_count: 0,
            inserted_at: now,
            visible_at: now,
        });
        Ok(())
    }

    async fn poll(
        &self,
        queue: &str,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> StorageResult<Vec<RawQueueMessage>> {
        self.begin()?;
        if max_count == 0 || max_count > MAX_POLL_COUNT {
            return Err(StorageError::remote(
                400,
                format!("max_count must be between 1 and {}", MAX_POLL_COUNT),
            ));
        }

        let now = Utc::now();
        let hidden_until = now + to_chrono(visibility_timeout)?;
        let mut queues = self.queues.write();
        let messages = queues.get_mut(queue).ok_or_else(|| missing_queue(queue))?;

        let delivered = messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_count)
            .map(|m| {
                let receipt = Uuid::new_v4().simple().to_string();
                m.dequeue_count += 1;
                m.pop_receipt = Some(receipt.clone());
                m.visible_at = hidden_until;
                RawQueueMessage {
                    message_id: m.id.clone(),
                    pop_receipt: receipt,
                    payload: m.payload.clone(),
                    dequeue_count: m.dequeue_count,
                    inserted_at: m.inserted_at,
                    next_visible_at: hidden_until,
                }
            })
            .collect();
        Ok(delivered)
    }

    async fn delete(&self, queue: &str, message_id: &str, pop_receipt: &str) -> StorageResult<()> {
        self.begin()?;
        let mut queues = self.queues.write();
        let messages = queues.get_mut(queue).ok_or_else(|| missing_queue(queue))?;
        let (index, _) = find_delivery(messages, message_id, pop_receipt)?;
        messages.remove(index);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(
        &self,
        queue: &str,
        message_id: &str,
        pop_receipt: &str,
        payload: Vec<u8>,
        visibility_timeout: Duration,
    ) -> StorageResult<String> {
        self.begin()?;
        let hidden_until = Utc::now() + to_chrono(visibility_timeout)?;
        let mut queues = self.queues.write();
        let messages = queues.get_mut(queue).ok_or_else(|| missing_queue(queue))?;
        let (_, message) = find_delivery(messages, message_id, pop_receipt)?;

        let receipt = Uuid::new_v4().simple().to_string();
        message.payload = payload;
        message.pop_receipt = Some(receipt.clone());
        message.visible_at = hidden_until;
        Ok(receipt)
    }

    async fn clear(&self, queue: &str) -> StorageResult<()> {
        self.begin()?;
        self.queues
            .write()
            .get_mut(queue)
            .ok_or_else(|| missing_queue(queue))?
            .clear();
        Ok(())
    }
}
