use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::{
    MessageReceipt, QueueCapability, QueueError, QueueMessage, QueueResult, RawQueueMessage,
    MAX_POLL_COUNT,
};
use kestrel_core::{KestrelConfigSnapshot, RetryExecutor, RetryPolicy, StorageResult};

/// Queues that can persist changes to a message they delivered
#[async_trait]
pub trait UpdateableQueue<T>: Send + Sync {
    async fn update_message(&self, message: &mut QueueMessage<T>) -> QueueResult<()>;
}

/// A delivery whose payload could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableMessage {
    pub message_id: String,
    pub dequeue_count: u32,
    pub error: String,
    /// `false` when the delete failed; the delivery comes back after its
    /// visibility timeout
    pub removed: bool,
}

/// One poll: the decoded messages and the deliveries that were not
pub struct ReceivedBatch<T> {
    pub messages: Vec<QueueMessage<T>>,
    pub undecodable: Vec<UndecodableMessage>,
}

impl<T> ReceivedBatch<T> {
    /// Deliveries in this poll, decoded or not
    pub fn len(&self) -> usize {
        self.messages.len() + self.undecodable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Typed queue operations used by producers and the batch processor
#[async_trait]
pub trait MessageQueue<T>: UpdateableQueue<T> {
    fn name(&self) -> &str;

    async fn ensure_exists(&self) -> QueueResult<()>;

    async fn add_message(&self, payload: &T) -> QueueResult<()>;

    async fn get_message(&self) -> QueueResult<Option<QueueMessage<T>>>;

    /// Receive up to `max_count` (1..=32) messages, bound to this queue
    async fn get_messages(&self, max_count: usize) -> QueueResult<Vec<QueueMessage<T>>>;

    /// Like [`get_messages`](Self::get_messages), also reporting deliveries
    /// that could not be decoded. Those are deleted, never handed out.
    async fn receive(&self, max_count: usize) -> QueueResult<ReceivedBatch<T>>;

    async fn delete_message(&self, message: &QueueMessage<T>) -> QueueResult<()>;

    async fn clear(&self) -> QueueResult<()>;
}

/// Configuration for a storage queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a polled message stays hidden from other pollers
    pub visibility_timeout: Duration,

    /// Retry policy applied to every remote call
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Read `queue.visibility_timeout_ms` and `retry.*`
    pub fn from_config(config: &KestrelConfigSnapshot) -> StorageResult<Self> {
        let mut queue = Self::new().with_retry_policy(RetryPolicy::from_config(config)?);
        if let Some(timeout) = config.get_duration_ms("queue.visibility_timeout_ms") {
            queue.visibility_timeout = timeout;
        }
        Ok(queue)
    }
}

/// Queue name derived from a type: its lowercased short name
pub fn type_queue_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_lowercase()
}

/// JSON-payload queue over a [`QueueCapability`]
pub struct StorageQueue<T> {
    queues: Arc<dyn QueueCapability>,
    name: String,
    config: QueueConfig,
    retry: RetryExecutor,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StorageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queues: self.queues.clone(),
            name: self.name.clone(),
            config: self.config.clone(),
            retry: self.retry.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> StorageQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<B, S>(queues: B, name: S, config: QueueConfig) -> Self
    where
        B: QueueCapability + 'static,
        S: Into<String>,
    {
        Self::shared(Arc::new(queues), name, config)
    }

    pub fn shared<S: Into<String>>(
        queues: Arc<dyn QueueCapability>,
        name: S,
        config: QueueConfig,
    ) -> Self {
        Self {
            queues,
            name: name.into(),
            retry: RetryExecutor::new(config.retry.clone()),
            config,
            _marker: PhantomData,
        }
    }

    /// Queue named after `T`
    pub fn for_type<B: QueueCapability + 'static>(queues: B, config: QueueConfig) -> Self {
        Self::new(queues, type_queue_name::<T>(), config)
    }

    /// Replace the retry executor (for custom transient error detection)
    pub fn with_retry_executor(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Share as a trait object, the form the batch processor takes
    pub fn into_shared(self) -> Arc<dyn MessageQueue<T>> {
        Arc::new(self)
    }

    fn materialize(
        &self,
        raw: RawQueueMessage,
        payload: T,
        origin: &Arc<dyn UpdateableQueue<T>>,
    ) -> QueueMessage<T> {
        QueueMessage::bound(
            payload,
            raw.dequeue_count,
            MessageReceipt {
                message_id: raw.message_id,
                pop_receipt: raw.pop_receipt,
            },
            raw.inserted_at,
            origin.clone(),
        )
    }

    /// Delete a delivery that can never be decoded
    async fn discard(&self, raw: &RawQueueMessage) -> QueueResult<()> {
        let queues = &self.queues;
        let name = self.name.as_str();
        match self
            .retry
            .execute(|| queues.delete(name, &raw.message_id, &raw.pop_receipt))
            .await
        {
            Err(err) if !err.is_not_found() => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<T> UpdateableQueue<T> for StorageQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[instrument(skip(self, message), fields(queue = %self.name, message_id = %message.message_id()))]
    async fn update_message(&self, message: &mut QueueMessage<T>) -> QueueResult<()> {
        let payload = serde_json::to_vec(&message.payload)?;
        let queues = &self.queues;
        let name = self.name.as_str();
        let receipt = message.receipt().clone();
        let timeout = self.config.visibility_timeout;

        let pop_receipt = self
            .retry
            .execute(|| {
                queues.update(
                    name,
                    &receipt.message_id,
                    &receipt.pop_receipt,
                    payload.clone(),
                    timeout,
                )
            })
            .await?;
        message.set_pop_receipt(pop_receipt);
        debug!("message updated");
        Ok(())
    }
}

#[async_trait]
impl<T> MessageQueue<T> for StorageQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn ensure_exists(&self) -> QueueResult<()> {
        let queues = &self.queues;
        let name = self.name.as_str();
        if self
            .retry
            .execute(|| queues.create_queue_if_not_exists(name))
            .await?
        {
            debug!("queue created");
        }
        Ok(())
    }

    async fn add_message(&self, payload: &T) -> QueueResult<()> {
        let bytes = serde_json::to_vec(payload)?;
        let queues = &self.queues;
        let name = self.name.as_str();
        self.retry
            .execute(|| queues.put(name, bytes.clone()))
            .await?;
        Ok(())
    }

    async fn get_message(&self) -> QueueResult<Option<QueueMessage<T>>> {
        Ok(self.get_messages(1).await?.pop())
    }

    async fn get_messages(&self, max_count: usize) -> QueueResult<Vec<QueueMessage<T>>> {
        Ok(self.receive(max_count).await?.messages)
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn receive(&self, max_count: usize) -> QueueResult<ReceivedBatch<T>> {
        if max_count == 0 || max_count > MAX_POLL_COUNT {
            return Err(QueueError::invalid_argument(
                "max_count",
                format!("must be between 1 and {}", MAX_POLL_COUNT),
            ));
        }

        let queues = &self.queues;
        let name = self.name.as_str();
        let timeout = self.config.visibility_timeout;
        let delivered = self
            .retry
            .execute(|| queues.poll(name, max_count, timeout))
            .await?;

        let origin: Arc<dyn UpdateableQueue<T>> = Arc::new(self.clone());
        let mut batch = ReceivedBatch {
            messages: Vec::with_capacity(delivered.len()),
            undecodable: Vec::new(),
        };
        for raw in delivered {
            let decode_error = match serde_json::from_slice::<T>(&raw.payload) {
                Ok(payload) => {
                    batch.messages.push(self.materialize(raw, payload, &origin));
                    continue;
                }
                Err(err) => err.to_string(),
            };

            // Undecodable payloads can never succeed; keep them from cycling forever
            let removed = match self.discard(&raw).await {
                Ok(()) => {
                    error!(
                        message_id = %raw.message_id,
                        dequeue_count = raw.dequeue_count,
                        error = %decode_error,
                        "discarded undecodable message"
                    );
                    true
                }
                Err(err) => {
                    error!(
                        message_id = %raw.message_id,
                        dequeue_count = raw.dequeue_count,
                        error = %err,
                        "failed to discard undecodable message"
                    );
                    false
                }
            };
            batch.undecodable.push(UndecodableMessage {
                message_id: raw.message_id,
                dequeue_count: raw.dequeue_count,
                error: decode_error,
                removed,
            });
        }
        Ok(batch)
    }

    #[instrument(skip(self, message), fields(queue = %self.name, message_id = %message.message_id()))]
    async fn delete_message(&self, message: &QueueMessage<T>) -> QueueResult<()> {
        let queues = &self.queues;
        let name = self.name.as_str();
        let receipt = message.receipt();

        match self
            .retry
            .execute(|| queues.delete(name, &receipt.message_id, &receipt.pop_receipt))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!("message already deleted");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn clear(&self) -> QueueResult<()> {
        let queues = &self.queues;
        let name = self.name.as_str();
        self.retry.execute(|| queues.clear(name)).await?;
        Ok(())
    }
}
