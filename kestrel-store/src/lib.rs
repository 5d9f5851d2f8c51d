//! # kestrel-store
//!
//! Typed object storage over a cloud blob container.
//!
//! - [`ObjectStore`] reads and writes serialized objects by ID
//! - writes are checked by a [`ConcurrencyContext`]: optimistic (version
//!   tokens), pessimistic (leases) or a custom registered [`WriteStrategy`]
//! - [`Table`] stores entities keyed by partition and row
//!
//! Remote services sit behind [`BlobCapability`] and [`TableCapability`]; the
//! [`memory`] module has in-process implementations for tests and development.
//!
//! ```rust,no_run
//! use kestrel_store::{JsonCodec, MemoryBlobService, ObjectStore, StoreConfig};
//!
//! # async fn demo() -> kestrel_core::StorageResult<()> {
//! let store: ObjectStore<Vec<String>> =
//!     ObjectStore::new(MemoryBlobService::new(), "drafts", JsonCodec, StoreConfig::default());
//! store.ensure_container_exists().await?;
//!
//! let (draft, context) = store.get("d-1").await?;
//! let mut draft = draft.unwrap_or_default();
//! draft.push("first line".to_string());
//! store.save_with(&context.into(), &draft).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod lease;
pub mod memory;
pub mod object_store;
pub mod store;
pub mod strategy;
pub mod table;
pub mod types;

pub use codec::{JsonCodec, ObjectCodec, RawBytesCodec};
pub use config::StoreConfig;
pub use context::{
    ConcurrencyContext, ContextKind, CustomConcurrencyContext, OptimisticConcurrencyContext,
    PessimisticConcurrencyContext, DEFAULT_LEASE_DURATION,
};
pub use lease::{LeaseManager, MAX_LEASE_DURATION, MIN_LEASE_DURATION};
pub use memory::{MemoryBlobService, MemoryTableService};
pub use object_store::ObjectStore;
pub use store::BlobCapability;
pub use strategy::{
    ConcurrencyStrategyRegistry, OptimisticWriteStrategy, PessimisticWriteStrategy,
    WriteStrategy, WriteTarget,
};
pub use table::{Table, TableCapability, TableEntity, TableProperties, TableRow};
pub use types::{
    type_container_name, type_table_name, AccessCondition, BlobContent, BlobDescriptor,
    BlobPayload, BoxStream, ContainerAccess, LeaseId, ListPage, VersionToken,
};

pub use kestrel_core::{StorageError, StorageResult};
