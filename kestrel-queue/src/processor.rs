use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    BatchCommand, MessageQueue, ProcessorEvent, QueueError, QueueMessage, QueueResult,
    UndecodableMessage, MAX_POLL_COUNT,
};
use kestrel_core::KestrelConfigSnapshot;

pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Failed deliveries beyond this count are evicted instead of retained
pub const DEFAULT_POISON_THRESHOLD: u32 = 5;

const EVENT_CAPACITY: usize = 256;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the batch processor
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    /// Messages requested per poll (1..=32)
    pub batch_size: usize,

    pub poison_threshold: u32,

    /// Delay between cycles of a started worker
    pub interval: Duration,

    /// Keep polling inside one cycle until the queue comes back empty
    pub drain: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poison_threshold: DEFAULT_POISON_THRESHOLD,
            interval: Duration::from_secs(10),
            drain: false,
        }
    }
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poison_threshold(mut self, threshold: u32) -> Self {
        self.poison_threshold = threshold;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_drain(mut self, drain: bool) -> Self {
        self.drain = drain;
        self
    }

    /// Read `queue.batch_size`, `queue.poison_threshold`, `queue.interval_ms`
    /// and `queue.drain`, keeping defaults for missing keys
    pub fn from_config(config: &KestrelConfigSnapshot) -> Self {
        let defaults = Self::default();
        Self {
            batch_size: config
                .get_usize("queue.batch_size")
                .unwrap_or(defaults.batch_size),
            poison_threshold: config
                .get_u32("queue.poison_threshold")
                .unwrap_or(defaults.poison_threshold),
            interval: config
                .get_duration_ms("queue.interval_ms")
                .unwrap_or(defaults.interval),
            drain: config.get_bool("queue.drain").unwrap_or(defaults.drain),
        }
    }

    fn validate(&self) -> QueueResult<()> {
        if self.batch_size == 0 || self.batch_size > MAX_POLL_COUNT {
            return Err(QueueError::invalid_argument(
                "batch_size",
                format!("must be between 1 and {}", MAX_POLL_COUNT),
            ));
        }
        Ok(())
    }
}

/// What happened during one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub polls: usize,
    pub received: usize,
    pub completed: usize,
    pub poisoned: usize,
    pub retained: usize,
    /// Undecodable deliveries deleted without reaching the command
    pub discarded: usize,
    pub delete_failures: usize,
}

/// Handle for a started processor
pub struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<QueueResult<()>>,
}

impl WorkerHandle {
    /// Stop after the running cycle, if any, finishes
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

/// Polls one queue in batches and runs a [`BatchCommand`] over each batch.
///
/// Successful messages are deleted. Failed messages stay on the queue and come
/// back after their visibility timeout, until their dequeue count exceeds the
/// poison threshold; then they are deleted as poison and reported.
pub struct BatchQueueProcessor<T> {
    queue: Arc<dyn MessageQueue<T>>,
    config: ProcessorConfig,
    events: broadcast::Sender<ProcessorEvent>,
}

impl<T> BatchQueueProcessor<T>
where
    T: Send + Sync + 'static,
{
    /// Processor for `queue` with the given batch size and default settings
    pub fn for_queue(
        queue: Option<Arc<dyn MessageQueue<T>>>,
        batch_size: usize,
    ) -> QueueResult<Self> {
        let queue =
            queue.ok_or_else(|| QueueError::invalid_argument("queue", "queue is required"))?;
        Self::new(queue, ProcessorConfig::default().with_batch_size(batch_size))
    }

    pub fn new(queue: Arc<dyn MessageQueue<T>>, config: ProcessorConfig) -> QueueResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            queue,
            config,
            events,
        })
    }

    /// Set the interval used by [`start`](Self::start)
    pub fn every(&mut self, interval: Duration) -> &mut Self {
        self.config.interval = interval;
        self
    }

    pub fn drain(&mut self, drain: bool) -> &mut Self {
        self.config.drain = drain;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<dyn MessageQueue<T>> {
        &self.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.events.subscribe()
    }

    /// Event stream that skips over events a slow consumer lagged behind on
    pub fn event_stream(&self) -> impl Stream<Item = ProcessorEvent> + Unpin + Send {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| event.ok())
    }

    /// Run one cycle: poll, `pre_run`, `run` each message, dispose, `post_run`.
    ///
    /// A failing first poll is returned before `pre_run`. In drain mode a later
    /// poll failure still runs `post_run` before it is returned.
    #[instrument(skip(self, command), fields(queue = %self.queue.name()))]
    pub async fn run_cycle<C>(&self, command: &C) -> QueueResult<CycleReport>
    where
        C: BatchCommand<T> + ?Sized,
    {
        let mut report = CycleReport::default();
        let mut batch = self.queue.receive(self.config.batch_size).await?;
        report.polls = 1;

        command.pre_run().await;

        let mut failure = None;
        loop {
            let received = batch.len();
            report.received += received;
            for undecodable in batch.undecodable {
                self.record_undecodable(undecodable, &mut report);
            }
            for message in batch.messages {
                self.dispose(command, message, &mut report).await;
            }

            if !self.config.drain || received == 0 {
                break;
            }
            match self.queue.receive(self.config.batch_size).await {
                Ok(next) => {
                    report.polls += 1;
                    batch = next;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        command.post_run().await;

        debug!(
            received = report.received,
            completed = report.completed,
            poisoned = report.poisoned,
            retained = report.retained,
            discarded = report.discarded,
            "cycle finished"
        );
        self.publish(ProcessorEvent::CycleFinished {
            queue: self.queue.name().to_string(),
            report: report.clone(),
            at: Utc::now(),
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Spawn a task running a cycle every configured interval until shutdown.
    /// Cycle errors are logged and the loop carries on.
    pub fn start<C>(self, command: C) -> WorkerHandle
    where
        C: BatchCommand<T> + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let period = self.config.interval.max(MIN_INTERVAL);

        let join_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(queue = %self.queue.name(), ?period, "Batch worker started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!(queue = %self.queue.name(), "Batch worker shutdown requested");
                        break;
                    }

                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cycle(&command).await {
                            error!(queue = %self.queue.name(), error = %e, "Batch cycle failed");
                        }
                    }
                }
            }

            info!(queue = %self.queue.name(), "Batch worker stopped");
            Ok(())
        });

        WorkerHandle {
            shutdown_tx,
            join_handle,
        }
    }

    async fn dispose<C>(&self, command: &C, mut message: QueueMessage<T>, report: &mut CycleReport)
    where
        C: BatchCommand<T> + ?Sized,
    {
        let message_id = message.message_id().to_string();
        let dequeue_count = message.dequeue_count();

        let succeeded = match AssertUnwindSafe(command.run(&mut message))
            .catch_unwind()
            .await
        {
            Ok(Ok(succeeded)) => succeeded,
            Ok(Err(e)) => {
                warn!(%message_id, dequeue_count, error = %e, "Command failed");
                false
            }
            Err(_) => {
                error!(%message_id, dequeue_count, "Command panicked");
                false
            }
        };

        let poisoned = !succeeded && dequeue_count > self.config.poison_threshold;
        if !succeeded && !poisoned {
            report.retained += 1;
            self.publish(ProcessorEvent::Retained {
                queue: self.queue.name().to_string(),
                message_id,
                dequeue_count,
                at: Utc::now(),
            });
            return;
        }

        if let Err(e) = self.queue.delete_message(&message).await {
            error!(%message_id, error = %e, "Failed to delete message");
            report.delete_failures += 1;
            self.publish(ProcessorEvent::DeleteFailed {
                queue: self.queue.name().to_string(),
                message_id,
                error: e.to_string(),
                at: Utc::now(),
            });
            return;
        }

        let queue = self.queue.name().to_string();
        if succeeded {
            report.completed += 1;
            self.publish(ProcessorEvent::Completed {
                queue,
                message_id,
                dequeue_count,
                at: Utc::now(),
            });
        } else {
            warn!(%message_id, dequeue_count, "Evicted poison message");
            report.poisoned += 1;
            self.publish(ProcessorEvent::Poisoned {
                queue,
                message_id,
                dequeue_count,
                at: Utc::now(),
            });
        }
    }

    fn record_undecodable(&self, undecodable: UndecodableMessage, report: &mut CycleReport) {
        let queue = self.queue.name().to_string();
        if undecodable.removed {
            report.discarded += 1;
            self.publish(ProcessorEvent::Discarded {
                queue,
                message_id: undecodable.message_id,
                dequeue_count: undecodable.dequeue_count,
                error: undecodable.error,
                at: Utc::now(),
            });
        } else {
            report.delete_failures += 1;
            self.publish(ProcessorEvent::DeleteFailed {
                queue,
                message_id: undecodable.message_id,
                error: undecodable.error,
                at: Utc::now(),
            });
        }
    }

    fn publish(&self, event: ProcessorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl<T> std::fmt::Debug for BatchQueueProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchQueueProcessor")
            .field("queue", &self.queue.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::KestrelConfig;

    #[test]
    fn config_defaults_and_overrides() {
        let defaults = ProcessorConfig::default();
        assert_eq!(defaults.batch_size, 32);
        assert_eq!(defaults.poison_threshold, 5);
        assert!(!defaults.drain);

        let mut config = KestrelConfig::new();
        config.set("queue.batch_size", "8");
        config.set("queue.poison_threshold", "2");
        config.set("queue.interval_ms", "250");
        config.set("queue.drain", "true");
        let parsed = ProcessorConfig::from_config(&config.snapshot());
        assert_eq!(
            parsed,
            ProcessorConfig::new()
                .with_batch_size(8)
                .with_poison_threshold(2)
                .with_interval(Duration::from_millis(250))
                .with_drain(true)
        );
    }

    #[test]
    fn batch_size_is_validated() {
        assert!(ProcessorConfig::new().with_batch_size(0).validate().is_err());
        assert!(ProcessorConfig::new().with_batch_size(33).validate().is_err());
        assert!(ProcessorConfig::new().with_batch_size(1).validate().is_ok());
    }
}
