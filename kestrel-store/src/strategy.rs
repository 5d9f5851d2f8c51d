use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    AccessCondition, BlobCapability, BlobPayload, ConcurrencyContext, ContextKind,
};
use kestrel_core::{StorageError, StorageResult};

/// Where a strategy writes: the blob service and the store's container
#[derive(Clone, Copy)]
pub struct WriteTarget<'a> {
    pub blobs: &'a dyn BlobCapability,
    pub container: &'a str,
}

/// Writes an encoded object under the rules of one context kind
#[async_trait]
pub trait WriteStrategy: Send + Sync {
    async fn write(
        &self,
        target: WriteTarget<'_>,
        context: &ConcurrencyContext,
        payload: BlobPayload,
    ) -> StorageResult<()>;
}

/// Conditional write: `IfMatch` on the read version, `IfNotExists` for
/// objects that were absent, unconditional otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticWriteStrategy;

#[async_trait]
impl WriteStrategy for OptimisticWriteStrategy {
    async fn write(
        &self,
        target: WriteTarget<'_>,
        context: &ConcurrencyContext,
        payload: BlobPayload,
    ) -> StorageResult<()> {
        let ConcurrencyContext::Optimistic(ctx) = context else {
            return Err(StorageError::invalid_argument(
                "context",
                format!("optimistic strategy cannot write a {} context", context.kind()),
            ));
        };

        let condition = match (&ctx.condition, &ctx.version) {
            (AccessCondition::None, Some(version)) => AccessCondition::IfMatch(version.clone()),
            (condition, _) => condition.clone(),
        };

        target
            .blobs
            .put(target.container, &ctx.object_id, payload, &condition)
            .await
            .map(|_| ())
            .map_err(|err| {
                if err.is_conflict() {
                    StorageError::conflict(&ctx.object_id, format!("version check failed: {}", err))
                } else {
                    err
                }
            })
    }
}

/// Write under a lease acquired earlier with `acquire_lock`
#[derive(Debug, Clone, Copy, Default)]
pub struct PessimisticWriteStrategy;

#[async_trait]
impl WriteStrategy for PessimisticWriteStrategy {
    async fn write(
        &self,
        target: WriteTarget<'_>,
        context: &ConcurrencyContext,
        payload: BlobPayload,
    ) -> StorageResult<()> {
        let ConcurrencyContext::Pessimistic(ctx) = context else {
            return Err(StorageError::invalid_argument(
                "context",
                format!("pessimistic strategy cannot write a {} context", context.kind()),
            ));
        };

        let lock_id = match &ctx.lock_id {
            Some(id) if !id.is_blank() => id.clone(),
            _ => {
                return Err(StorageError::invalid_argument(
                    "lock_id",
                    "LockId cannot be null or empty; call acquire_lock first",
                ))
            }
        };

        target
            .blobs
            .put(
                target.container,
                &ctx.object_id,
                payload,
                &AccessCondition::LeaseHeld(lock_id),
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                if err.is_conflict() {
                    StorageError::conflict(&ctx.object_id, format!("lease check failed: {}", err))
                } else {
                    err
                }
            })
    }
}

/// Maps context kinds to the strategy that writes them
pub struct ConcurrencyStrategyRegistry {
    strategies: HashMap<ContextKind, Arc<dyn WriteStrategy>>,
}

impl ConcurrencyStrategyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Registry with the optimistic and pessimistic strategies installed
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ContextKind::Optimistic, Arc::new(OptimisticWriteStrategy));
        registry.register(ContextKind::Pessimistic, Arc::new(PessimisticWriteStrategy));
        registry
    }

    /// Register a strategy, replacing and returning any previous one for `kind`
    pub fn register(
        &mut self,
        kind: ContextKind,
        strategy: Arc<dyn WriteStrategy>,
    ) -> Option<Arc<dyn WriteStrategy>> {
        self.strategies.insert(kind, strategy)
    }

    pub fn get(&self, kind: &ContextKind) -> StorageResult<Arc<dyn WriteStrategy>> {
        self.strategies
            .get(kind)
            .cloned()
            .ok_or_else(|| StorageError::StrategyNotRegistered {
                kind: kind.to_string(),
            })
    }

    pub fn is_registered(&self, kind: &ContextKind) -> bool {
        self.strategies.contains_key(kind)
    }

    pub fn registered_kinds(&self) -> Vec<ContextKind> {
        self.strategies.keys().cloned().collect()
    }
}

impl Default for ConcurrencyStrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
