use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing_test::traced_test;

use kestrel_core::{Backoff, RetryPolicy, StorageError, StorageResult};
use kestrel_queue::{
    BatchCommand, BatchQueueProcessor, MemoryQueueService, MessageQueue, ProcessorConfig,
    ProcessorEvent, QueueCapability, QueueConfig, QueueError, QueueMessage, RawQueueMessage,
    StorageQueue,
};

const QUEUE: &str = "surveyanswer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SurveyAnswer {
    survey: String,
    step: u32,
}

fn answer(survey: &str) -> SurveyAnswer {
    SurveyAnswer {
        survey: survey.into(),
        step: 0,
    }
}

/// Test factory: memory service plus a typed queue with instant retries
async fn create_test_queue() -> (MemoryQueueService, Arc<dyn MessageQueue<SurveyAnswer>>) {
    let service = MemoryQueueService::new();
    let config = QueueConfig::default()
        .with_retry_policy(RetryPolicy::new(3, Backoff::Fixed(Duration::ZERO)));
    let queue = StorageQueue::<SurveyAnswer>::for_type(service.clone(), config).into_shared();
    queue.ensure_exists().await.unwrap();
    (service, queue)
}

async fn enqueue(queue: &Arc<dyn MessageQueue<SurveyAnswer>>, surveys: &[&str]) {
    for survey in surveys {
        queue.add_message(&answer(survey)).await.unwrap();
    }
}

/// Deliver every message `times` times without deleting it
async fn redeliver(service: &MemoryQueueService, queue: &Arc<dyn MessageQueue<SurveyAnswer>>, times: usize) {
    for _ in 0..times {
        queue.get_messages(32).await.unwrap();
        service.expire_visibility(QUEUE);
    }
}

/// Command double that records its lifecycle calls
#[derive(Default)]
struct RecordingCommand {
    pre_runs: AtomicUsize,
    post_runs: AtomicUsize,
    seen: Mutex<Vec<(String, u32)>>,
    fail: Vec<&'static str>,
    error: Vec<&'static str>,
    panic: Vec<&'static str>,
}

impl RecordingCommand {
    fn failing(surveys: &[&'static str]) -> Self {
        Self {
            fail: surveys.to_vec(),
            ..Self::default()
        }
    }

    fn runs(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl BatchCommand<SurveyAnswer> for RecordingCommand {
    async fn pre_run(&self) {
        self.pre_runs.fetch_add(1, Ordering::SeqCst);
    }

    async fn run(&self, message: &mut QueueMessage<SurveyAnswer>) -> anyhow::Result<bool> {
        let survey = message.payload.survey.clone();
        self.seen
            .lock()
            .push((survey.clone(), message.dequeue_count()));

        if self.panic.contains(&survey.as_str()) {
            panic!("command blew up on {}", survey);
        }
        if self.error.contains(&survey.as_str()) {
            anyhow::bail!("cannot store {}", survey);
        }
        Ok(!self.fail.contains(&survey.as_str()))
    }

    async fn post_run(&self) {
        self.post_runs.fetch_add(1, Ordering::SeqCst);
    }
}

/// P1. Successful Messages Are Deleted Within One Bracket
#[tokio::test]
async fn test_successful_batch_deletes_every_message() {
    let (service, queue) = create_test_queue().await;
    enqueue(&queue, &["a", "b"]).await;

    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();
    let command = RecordingCommand::default();
    let report = processor.run_cycle(&command).await.unwrap();

    assert_eq!(report.received, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(service.delete_count(), 2);
    assert_eq!(service.message_count(QUEUE), 0);
    assert_eq!(command.pre_runs.load(Ordering::SeqCst), 1);
    assert_eq!(command.post_runs.load(Ordering::SeqCst), 1);

    // Delivery order is kept
    let seen: Vec<String> = command.seen.lock().iter().map(|(s, _)| s.clone()).collect();
    assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
}

/// P2. Empty Poll Still Brackets The Cycle
#[tokio::test]
async fn test_empty_poll_runs_hooks_only() {
    let (service, queue) = create_test_queue().await;

    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();
    let command = RecordingCommand::default();
    let report = processor.run_cycle(&command).await.unwrap();

    assert_eq!(report.received, 0);
    assert_eq!(command.runs(), 0);
    assert_eq!(command.pre_runs.load(Ordering::SeqCst), 1);
    assert_eq!(command.post_runs.load(Ordering::SeqCst), 1);
    assert_eq!(service.delete_count(), 0);
}

/// P3. Failed Messages Under The Threshold Are Retained
#[tokio::test]
async fn test_failed_message_is_left_for_redelivery() {
    let (service, queue) = create_test_queue().await;
    enqueue(&queue, &["bad", "good"]).await;
    redeliver(&service, &queue, 4).await;

    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();
    let command = RecordingCommand::failing(&["bad"]);
    let report = processor.run_cycle(&command).await.unwrap();

    // fifth delivery: dequeue_count == 5, not above the threshold
    assert_eq!(command.seen.lock()[0], ("bad".to_string(), 5));
    assert_eq!(report.retained, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.poisoned, 0);
    assert_eq!(service.message_count(QUEUE), 1);
}

/// P4. Poison Messages Are Evicted And Reported
#[tokio::test]
#[traced_test]
async fn test_poison_message_is_evicted() {
    let (service, queue) = create_test_queue().await;
    enqueue(&queue, &["bad"]).await;
    redeliver(&service, &queue, 5).await;

    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();
    let mut events = processor.subscribe();
    let command = RecordingCommand::failing(&["bad"]);
    let report = processor.run_cycle(&command).await.unwrap();

    assert_eq!(command.seen.lock()[0].1, 6);
    assert_eq!(report.poisoned, 1);
    assert_eq!(service.message_count(QUEUE), 0);
    assert!(logs_contain("Evicted poison message"));

    let event = events.recv().await.unwrap();
    match event {
        ProcessorEvent::Poisoned {
            queue,
            dequeue_count,
            ..
        } => {
            assert_eq!(queue, QUEUE);
            assert_eq!(dequeue_count, 6);
        }
        other => panic!("expected poisoned event, got {:?}", other),
    }
    assert_eq!(events.recv().await.unwrap().event_name(), "cycle_finished");
}

/// P5. Errors And Panics Count As Failures Without Aborting The Batch
#[tokio::test]
async fn test_command_errors_and_panics_are_contained() {
    let (service, queue) = create_test_queue().await;
    enqueue(&queue, &["erroring", "panicking", "fine"]).await;

    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();
    let command = RecordingCommand {
        error: vec!["erroring"],
        panic: vec!["panicking"],
        ..RecordingCommand::default()
    };
    let report = processor.run_cycle(&command).await.unwrap();

    assert_eq!(command.runs(), 3);
    assert_eq!(report.retained, 2);
    assert_eq!(report.completed, 1);
    assert_eq!(command.post_runs.load(Ordering::SeqCst), 1);
    assert_eq!(service.message_count(QUEUE), 2);
}

/// P6. A Missing Queue Is Rejected
#[tokio::test]
async fn test_for_queue_requires_a_queue() {
    let err = BatchQueueProcessor::<SurveyAnswer>::for_queue(None, 32).unwrap_err();
    assert!(matches!(err, QueueError::InvalidArgument { ref name, .. } if name == "queue"));

    let (_service, queue) = create_test_queue().await;
    let err = BatchQueueProcessor::for_queue(Some(queue), 0).unwrap_err();
    assert!(matches!(err, QueueError::InvalidArgument { .. }));
}

/// P7. One Cycle Polls At Most One Batch
#[tokio::test]
async fn test_cycle_is_bounded_by_batch_size() {
    let (service, queue) = create_test_queue().await;
    let surveys: Vec<String> = (0..40).map(|i| format!("s{}", i)).collect();
    for survey in &surveys {
        queue.add_message(&answer(survey)).await.unwrap();
    }

    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();
    let report = processor
        .run_cycle(&RecordingCommand::default())
        .await
        .unwrap();

    assert_eq!(report.polls, 1);
    assert_eq!(report.completed, 32);
    assert_eq!(service.message_count(QUEUE), 8);
}

/// P8. Drain Mode Empties The Queue In One Bracket
#[tokio::test]
async fn test_drain_mode_polls_until_empty() {
    let (service, queue) = create_test_queue().await;
    for i in 0..25 {
        queue.add_message(&answer(&format!("s{}", i))).await.unwrap();
    }

    let mut processor = BatchQueueProcessor::for_queue(Some(queue), 10).unwrap();
    processor.drain(true);
    let command = RecordingCommand::default();
    let report = processor.run_cycle(&command).await.unwrap();

    // 10 + 10 + 5, then an empty poll
    assert_eq!(report.polls, 4);
    assert_eq!(report.completed, 25);
    assert_eq!(command.pre_runs.load(Ordering::SeqCst), 1);
    assert_eq!(command.post_runs.load(Ordering::SeqCst), 1);
    assert_eq!(service.message_count(QUEUE), 0);
}

/// P9. Transient Poll Failures Are Retried, Fatal Ones Surface Before PreRun
#[tokio::test]
async fn test_poll_failures_follow_retry_classification() {
    let (service, queue) = create_test_queue().await;
    enqueue(&queue, &["a"]).await;
    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();

    service.inject_failures(vec![StorageError::remote(503, "server busy")]);
    let command = RecordingCommand::default();
    assert_eq!(processor.run_cycle(&command).await.unwrap().completed, 1);

    service.inject_failures(vec![StorageError::remote(403, "forbidden")]);
    let command = RecordingCommand::default();
    let err = processor.run_cycle(&command).await.unwrap_err();
    assert_eq!(err.storage().map(StorageError::status_code), Some(403));
    assert_eq!(command.pre_runs.load(Ordering::SeqCst), 0);
    assert_eq!(command.post_runs.load(Ordering::SeqCst), 0);
}

/// Checkpoints payload progress before failing
struct CheckpointCommand;

#[async_trait]
impl BatchCommand<SurveyAnswer> for CheckpointCommand {
    async fn run(&self, message: &mut QueueMessage<SurveyAnswer>) -> anyhow::Result<bool> {
        message.payload.step += 1;
        message.update_queue_message().await?;
        Ok(false)
    }
}

/// P10. Commands Can Checkpoint Through The Origin Queue
#[tokio::test]
async fn test_command_checkpoint_survives_redelivery() {
    let (service, queue) = create_test_queue().await;
    enqueue(&queue, &["long"]).await;

    let processor = BatchQueueProcessor::for_queue(Some(queue.clone()), 32).unwrap();
    processor.run_cycle(&CheckpointCommand).await.unwrap();
    service.expire_visibility(QUEUE);
    processor.run_cycle(&CheckpointCommand).await.unwrap();
    service.expire_visibility(QUEUE);

    let message = queue.get_message().await.unwrap().unwrap();
    assert_eq!(message.payload.step, 2);
    assert_eq!(message.dequeue_count(), 3);
}

/// P11. A Stale Delete Is Reported, Not Fatal
#[tokio::test]
async fn test_delete_failures_are_counted() {
    struct SlowCommand {
        service: MemoryQueueService,
    }

    #[async_trait]
    impl BatchCommand<SurveyAnswer> for SlowCommand {
        async fn run(&self, _message: &mut QueueMessage<SurveyAnswer>) -> anyhow::Result<bool> {
            // Visibility runs out and another worker picks the message up
            self.service.expire_visibility(QUEUE);
            let other = StorageQueue::<SurveyAnswer>::for_type(
                self.service.clone(),
                QueueConfig::default(),
            );
            other.get_message().await?;
            Ok(true)
        }
    }

    let (service, queue) = create_test_queue().await;
    enqueue(&queue, &["contended"]).await;

    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();
    let mut events = processor.event_stream();
    let report = processor
        .run_cycle(&SlowCommand {
            service: service.clone(),
        })
        .await
        .unwrap();

    assert_eq!(report.delete_failures, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(service.message_count(QUEUE), 1);
    assert_eq!(events.next().await.unwrap().event_name(), "delete_failed");
}

/// P12. Started Workers Run On Their Interval Until Shutdown
#[tokio::test]
async fn test_worker_runs_until_shutdown() {
    let (service, queue) = create_test_queue().await;
    enqueue(&queue, &["a", "b", "c"]).await;

    let mut processor = BatchQueueProcessor::for_queue(Some(queue.clone()), 2).unwrap();
    processor
        .every(Duration::from_millis(10))
        .every(Duration::from_millis(20));
    assert_eq!(processor.config().interval, Duration::from_millis(20));

    let mut events = processor.event_stream();
    let worker = processor.start(RecordingCommand::default());

    let mut completed = 0;
    while completed < 3 {
        let event = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .expect("Timeout waiting for event")
            .expect("Stream ended");
        if let ProcessorEvent::Completed { .. } = event {
            completed += 1;
        }
    }

    worker.shutdown().await.unwrap();
    assert_eq!(service.message_count(QUEUE), 0);

    enqueue(&queue, &["late"]).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(service.message_count(QUEUE), 1);
}

#[test]
fn test_processor_config_is_applied() {
    let config = ProcessorConfig::new()
        .with_batch_size(4)
        .with_poison_threshold(1);
    let queue = StorageQueue::<SurveyAnswer>::for_type(MemoryQueueService::new(), QueueConfig::default())
        .into_shared();
    let processor = BatchQueueProcessor::new(queue, config.clone()).unwrap();
    assert_eq!(processor.config(), &config);
}

/// P13. Undecodable Deliveries Are Discarded And Reported
#[tokio::test]
async fn test_undecodable_messages_are_discarded_and_reported() {
    let (service, queue) = create_test_queue().await;
    service.put(QUEUE, b"not json".to_vec()).await.unwrap();
    enqueue(&queue, &["a"]).await;

    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();
    let mut events = processor.event_stream();
    let command = RecordingCommand::default();
    let report = processor.run_cycle(&command).await.unwrap();

    assert_eq!(report.received, 2);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.delete_failures, 0);
    assert_eq!(command.runs(), 1);
    assert_eq!(service.message_count(QUEUE), 0);

    match events.next().await.unwrap() {
        ProcessorEvent::Discarded {
            queue,
            dequeue_count,
            ..
        } => {
            assert_eq!(queue, QUEUE);
            assert_eq!(dequeue_count, 1);
        }
        other => panic!("expected discarded event, got {:?}", other),
    }
    assert_eq!(events.next().await.unwrap().event_name(), "completed");
}

/// Memory service whose deletes are always refused
#[derive(Clone, Default)]
struct ReadOnlyDeletes {
    inner: MemoryQueueService,
}

#[async_trait]
impl QueueCapability for ReadOnlyDeletes {
    async fn create_queue_if_not_exists(&self, queue: &str) -> StorageResult<bool> {
        self.inner.create_queue_if_not_exists(queue).await
    }

    async fn put(&self, queue: &str, payload: Vec<u8>) -> StorageResult<()> {
        self.inner.put(queue, payload).await
    }

    async fn poll(
        &self,
        queue: &str,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> StorageResult<Vec<RawQueueMessage>> {
        self.inner.poll(queue, max_count, visibility_timeout).await
    }

    async fn delete(&self, _queue: &str, _message_id: &str, _pop_receipt: &str) -> StorageResult<()> {
        Err(StorageError::remote(403, "delete not permitted"))
    }

    async fn update(
        &self,
        queue: &str,
        message_id: &str,
        pop_receipt: &str,
        payload: Vec<u8>,
        visibility_timeout: Duration,
    ) -> StorageResult<String> {
        self.inner
            .update(queue, message_id, pop_receipt, payload, visibility_timeout)
            .await
    }

    async fn clear(&self, queue: &str) -> StorageResult<()> {
        self.inner.clear(queue).await
    }
}

/// P14. A Failed Discard Does Not Cost The Rest Of The Batch
#[tokio::test]
#[traced_test]
async fn test_failed_discard_keeps_the_batch() {
    let service = ReadOnlyDeletes::default();
    let config = QueueConfig::default()
        .with_retry_policy(RetryPolicy::new(3, Backoff::Fixed(Duration::ZERO)));
    let queue = StorageQueue::<SurveyAnswer>::for_type(service.clone(), config).into_shared();
    queue.ensure_exists().await.unwrap();
    service.put(QUEUE, b"not json".to_vec()).await.unwrap();
    enqueue(&queue, &["a"]).await;

    let processor = BatchQueueProcessor::for_queue(Some(queue), 32).unwrap();
    let command = RecordingCommand::default();
    let report = processor.run_cycle(&command).await.unwrap();

    assert_eq!(command.runs(), 1);
    assert_eq!(report.received, 2);
    assert_eq!(report.discarded, 0);
    assert_eq!(report.completed, 0);
    assert_eq!(report.delete_failures, 2);
    assert_eq!(service.inner.message_count(QUEUE), 2);
    assert!(logs_contain("failed to discard undecodable message"));
}
