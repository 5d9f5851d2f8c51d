//! # kestrel-queue
//!
//! Typed storage queues and a batch processor with poison-message eviction.
//!
//! - [`QueueCapability`] is the contract a queue service has to meet: poll
//!   with a visibility timeout, delete and update by pop receipt.
//! - [`StorageQueue<T>`] puts JSON payloads on top of it and hands out
//!   [`QueueMessage<T>`]s that know which queue they came from.
//! - [`BatchQueueProcessor<T>`] polls a batch, brackets it with
//!   [`BatchCommand::pre_run`] / [`BatchCommand::post_run`], deletes what
//!   succeeded and evicts messages that keep failing.
//!
//! Every remote call goes through the [`kestrel_core::RetryExecutor`].
//!
//! ```rust,no_run
//! use kestrel_queue::{
//!     BatchCommand, BatchQueueProcessor, MemoryQueueService, MessageQueue, QueueConfig,
//!     QueueMessage, StorageQueue,
//! };
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct SurveyAnswer {
//!     survey: String,
//! }
//!
//! struct StoreAnswers;
//!
//! #[async_trait::async_trait]
//! impl BatchCommand<SurveyAnswer> for StoreAnswers {
//!     async fn run(&self, message: &mut QueueMessage<SurveyAnswer>) -> anyhow::Result<bool> {
//!         println!("answer for {}", message.payload.survey);
//!         Ok(true)
//!     }
//! }
//!
//! # async fn example() -> kestrel_queue::QueueResult<()> {
//! let queue = StorageQueue::<SurveyAnswer>::for_type(MemoryQueueService::new(), QueueConfig::default());
//! queue.ensure_exists().await?;
//!
//! let mut processor = BatchQueueProcessor::for_queue(Some(queue.into_shared()), 16)?;
//! processor.every(Duration::from_secs(5));
//! let worker = processor.start(StoreAnswers);
//! // ...
//! worker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod command;
pub mod error;
pub mod events;
pub mod memory;
pub mod message;
pub mod processor;
pub mod queue;

pub use capability::{QueueCapability, RawQueueMessage, MAX_POLL_COUNT};
pub use command::BatchCommand;
pub use error::{QueueError, QueueResult};
pub use events::ProcessorEvent;
pub use memory::MemoryQueueService;
pub use message::{MessageReceipt, QueueMessage};
pub use processor::{
    BatchQueueProcessor, CycleReport, ProcessorConfig, WorkerHandle, DEFAULT_BATCH_SIZE,
    DEFAULT_POISON_THRESHOLD,
};
pub use queue::{
    type_queue_name, MessageQueue, QueueConfig, ReceivedBatch, StorageQueue, UndecodableMessage,
    UpdateableQueue,
};

pub use kestrel_core::{StorageError, StorageResult};
