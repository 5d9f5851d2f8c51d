//! # kestrel-core
//!
//! Shared building blocks for the Kestrel storage toolkit:
//!
//! - [`StorageError`] and its [`FailureClass`] classification
//! - [`RetryPolicy`], [`Backoff`] and the [`RetryExecutor`] every remote call goes through
//! - [`KestrelConfig`], a key/value configuration store with environment overrides
//!
//! `kestrel-store` (concurrency-controlled object store) and `kestrel-queue`
//! (batch queue processing) are both built on these.

pub mod config;
pub mod errors;
pub mod retry;

#[cfg(feature = "tracing-basic")]
pub mod telemetry;

pub use config::{KestrelConfig, KestrelConfigSnapshot};
pub use errors::{FailureClass, StorageError, StorageResult};
pub use retry::{
    Backoff, RetryExecutor, RetryPolicy, StorageTransientErrorDetection, TransientErrorDetection,
};

#[cfg(feature = "tracing-basic")]
pub use telemetry::init_tracing;
