use async_stream::stream;
use futures::TryStreamExt;
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::{
    types::{require_object_id, type_container_name},
    BlobCapability, BlobDescriptor, BlobPayload, BoxStream, ConcurrencyContext,
    ConcurrencyStrategyRegistry, ContextKind, JsonCodec, LeaseManager, ObjectCodec,
    OptimisticConcurrencyContext, PessimisticConcurrencyContext, StoreConfig, WriteStrategy,
    WriteTarget,
};
use kestrel_core::{RetryExecutor, StorageResult};

/// Typed objects in one blob container, with concurrency-controlled writes.
///
/// Every remote call goes through the store's [`RetryExecutor`]; only
/// transient failures are retried. Writes are dispatched on the kind of the
/// [`ConcurrencyContext`] to a registered [`WriteStrategy`].
pub struct ObjectStore<T, C = JsonCodec> {
    blobs: Arc<dyn BlobCapability>,
    container: String,
    codec: C,
    config: StoreConfig,
    retry: RetryExecutor,
    leases: LeaseManager,
    strategies: RwLock<ConcurrencyStrategyRegistry>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> ObjectStore<T, C>
where
    C: ObjectCodec<T>,
{
    /// Create a store over `container`
    pub fn new<B, S>(blobs: B, container: S, codec: C, config: StoreConfig) -> Self
    where
        B: BlobCapability + 'static,
        S: Into<String>,
    {
        Self::shared(Arc::new(blobs), container, codec, config)
    }

    /// Create a store over an already shared blob service
    pub fn shared<S: Into<String>>(
        blobs: Arc<dyn BlobCapability>,
        container: S,
        codec: C,
        config: StoreConfig,
    ) -> Self {
        let container = container.into();
        let retry = RetryExecutor::new(config.retry.clone());
        let leases = LeaseManager::new(blobs.clone(), container.clone(), retry.clone());

        Self {
            blobs,
            container,
            codec,
            config,
            retry,
            leases,
            strategies: RwLock::new(ConcurrencyStrategyRegistry::with_defaults()),
            _marker: PhantomData,
        }
    }

    /// Create a store whose container is named after `T`
    pub fn for_type<B>(blobs: B, codec: C, config: StoreConfig) -> Self
    where
        B: BlobCapability + 'static,
    {
        Self::new(blobs, type_container_name::<T>(), codec, config)
    }

    /// Replace the retry executor (for custom transient error detection)
    pub fn with_retry_executor(mut self, retry: RetryExecutor) -> Self {
        self.leases = LeaseManager::new(self.blobs.clone(), self.container.clone(), retry.clone());
        self.retry = retry;
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Install or replace the write strategy for a context kind
    pub fn register_write_strategy(
        &self,
        kind: ContextKind,
        strategy: Arc<dyn WriteStrategy>,
    ) -> Option<Arc<dyn WriteStrategy>> {
        debug!(container = %self.container, %kind, "registering write strategy");
        self.strategies.write().register(kind, strategy)
    }

    /// Create the container if needed, with the configured public access
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn ensure_container_exists(&self) -> StorageResult<()> {
        let blobs = &self.blobs;
        let container = self.container.as_str();
        let access = self.config.container_access();

        let created = self
            .retry
            .execute(|| blobs.create_container_if_not_exists(container, access))
            .await?;
        if created {
            info!(?access, "container created");
        }
        Ok(())
    }

    /// Delete the whole container. A missing container is not an error.
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn delete_container(&self) -> StorageResult<()> {
        let blobs = &self.blobs;
        let container = self.container.as_str();

        match self.retry.execute(|| blobs.delete_container(container)).await {
            Ok(()) => {
                info!("container deleted");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                warn!("container did not exist");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Read an object with the context needed to write it back.
    ///
    /// A missing object yields `None` and a context that only allows creating it.
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn get(
        &self,
        object_id: &str,
    ) -> StorageResult<(Option<T>, OptimisticConcurrencyContext)> {
        require_object_id(object_id)?;
        let blobs = &self.blobs;
        let container = self.container.as_str();

        match self.retry.execute(|| blobs.get(container, object_id)).await {
            Ok(content) => {
                let value = self.codec.decode(&content.bytes)?;
                Ok((
                    Some(value),
                    OptimisticConcurrencyContext::for_version(object_id, content.version),
                ))
            }
            Err(err) if err.is_not_found() => {
                debug!("object not found");
                Ok((None, OptimisticConcurrencyContext::for_absent(object_id)))
            }
            Err(err) => Err(err),
        }
    }

    /// Read an object, discarding the concurrency context
    pub async fn get_value(&self, object_id: &str) -> StorageResult<Option<T>> {
        self.get(object_id).await.map(|(value, _)| value)
    }

    /// Fresh pessimistic context using the configured lease duration
    pub fn lock_context<S: Into<String>>(&self, object_id: S) -> PessimisticConcurrencyContext {
        PessimisticConcurrencyContext::new(object_id).with_duration(self.config.lease_duration)
    }

    /// See [`LeaseManager::acquire`]
    pub async fn acquire_lock(
        &self,
        context: &mut PessimisticConcurrencyContext,
    ) -> StorageResult<bool> {
        self.leases.acquire(context).await
    }

    pub async fn release_lock(&self, context: &PessimisticConcurrencyContext) -> StorageResult<()> {
        self.leases.release(context).await
    }

    /// Unconditional overwrite, last writer wins
    pub async fn save(&self, object_id: &str, value: &T) -> StorageResult<()> {
        let context = OptimisticConcurrencyContext::unconditional(object_id).into();
        self.save_with(&context, value).await
    }

    /// Write `value` under the rules of `context`'s kind.
    ///
    /// Nothing is sent when the object ID is empty or no strategy is registered
    /// for the kind.
    #[instrument(
        skip(self, context, value),
        fields(container = %self.container, object_id = %context.object_id(), kind = %context.kind())
    )]
    pub async fn save_with(&self, context: &ConcurrencyContext, value: &T) -> StorageResult<()> {
        require_object_id(context.object_id())?;

        let strategy = self.strategies.read().get(&context.kind())?;
        let payload = BlobPayload::new(self.codec.encode(value)?, self.codec.content_type());
        let target = WriteTarget {
            blobs: self.blobs.as_ref(),
            container: &self.container,
        };

        let result = self
            .retry
            .execute(|| strategy.write(target, context, payload.clone()))
            .await;

        if let Err(err) = &result {
            if err.is_conflict() {
                warn!(error = %err, "write rejected by concurrency check");
            }
        }
        result
    }

    /// Delete an object if it exists
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn delete(&self, object_id: &str) -> StorageResult<()> {
        require_object_id(object_id)?;
        let blobs = &self.blobs;
        let container = self.container.as_str();

        match self
            .retry
            .execute(|| blobs.delete_if_exists(container, object_id))
            .await
        {
            Ok(deleted) => {
                debug!(deleted, "delete finished");
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Lazily page through the container.
    ///
    /// Each call starts a fresh listing; pages are fetched as the stream is polled.
    pub fn list(&self) -> BoxStream<'_, StorageResult<BlobDescriptor>> {
        let blobs = &self.blobs;
        let container = self.container.as_str();
        let retry = &self.retry;

        Box::pin(stream! {
            let mut continuation: Option<String> = None;
            loop {
                let marker = continuation.as_deref();
                let page = match retry.execute(|| blobs.list_page(container, marker)).await {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                };
                for item in page.items {
                    yield Ok(item);
                }
                match page.continuation {
                    Some(next) => continuation = Some(next),
                    None => break,
                }
            }
        })
    }

    /// Collect every object name in the container
    pub async fn list_names(&self) -> StorageResult<Vec<String>> {
        self.list().map_ok(|descriptor| descriptor.name).try_collect().await
    }
}

impl<T, C> std::fmt::Debug for ObjectStore<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("container", &self.container)
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
