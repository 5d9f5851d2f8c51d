use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::{types::require_object_id, BlobCapability, LeaseId, PessimisticConcurrencyContext};
use kestrel_core::{RetryExecutor, StorageError, StorageResult};

/// Shortest lease the blob service grants
pub const MIN_LEASE_DURATION: Duration = Duration::from_secs(15);
/// Longest finite lease the blob service grants
pub const MAX_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Acquires and releases leases for one container
pub struct LeaseManager {
    blobs: Arc<dyn BlobCapability>,
    container: String,
    retry: RetryExecutor,
}

impl LeaseManager {
    pub fn new<S: Into<String>>(
        blobs: Arc<dyn BlobCapability>,
        container: S,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            blobs,
            container: container.into(),
            retry,
        }
    }

    pub fn clamp_duration(duration: Duration) -> Duration {
        duration.clamp(MIN_LEASE_DURATION, MAX_LEASE_DURATION)
    }

    /// Try to take the lease on `context.object_id`.
    ///
    /// - lease granted: `Ok(true)`, `lock_id` set
    /// - object does not exist: `Ok(true)`, `lock_id` cleared (nothing to protect yet)
    /// - lease held by someone else: `Ok(false)`, `lock_id` cleared
    #[instrument(skip(self, context), fields(container = %self.container, object_id = %context.object_id))]
    pub async fn acquire(&self, context: &mut PessimisticConcurrencyContext) -> StorageResult<bool> {
        require_object_id(&context.object_id)?;

        let duration = Self::clamp_duration(context.lease_duration);
        let proposed = LeaseId::generate();
        let blobs = &self.blobs;
        let container = self.container.as_str();
        let name = context.object_id.as_str();
        let proposed_ref = &proposed;

        let outcome = self
            .retry
            .execute(|| blobs.acquire_lease(container, name, duration, proposed_ref))
            .await;

        match outcome {
            Ok(lease) => {
                debug!(lease_id = %lease, ?duration, "lease acquired");
                context.lock_id = Some(lease);
                Ok(true)
            }
            Err(err) if err.is_not_found() => {
                debug!("object does not exist yet, nothing to lock");
                context.lock_id = None;
                Ok(true)
            }
            Err(err) if err.is_conflict() => {
                warn!(error = %err, "lease already held");
                context.lock_id = None;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Release the lease recorded in `context`
    #[instrument(skip(self, context), fields(container = %self.container, object_id = %context.object_id))]
    pub async fn release(&self, context: &PessimisticConcurrencyContext) -> StorageResult<()> {
        let lock_id = match &context.lock_id {
            Some(id) if !id.is_blank() => id,
            _ => {
                return Err(StorageError::invalid_argument(
                    "lock_id",
                    "LockId cannot be null or empty",
                ))
            }
        };

        let blobs = &self.blobs;
        let container = self.container.as_str();
        let name = context.object_id.as_str();

        self.retry
            .execute(|| blobs.release_lease(container, name, lock_id))
            .await?;
        debug!(lease_id = %lock_id, "lease released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessCondition, BlobPayload, ContainerAccess, MemoryBlobService};
    use bytes::Bytes;
    use tracing_test::traced_test;

    async fn seeded() -> (MemoryBlobService, LeaseManager) {
        let blobs = MemoryBlobService::new();
        blobs
            .create_container_if_not_exists("orders", ContainerAccess::Private)
            .await
            .unwrap();
        blobs
            .put(
                "orders",
                "o-1",
                BlobPayload::new(Bytes::from_static(b"{}"), "application/json"),
                &AccessCondition::None,
            )
            .await
            .unwrap();
        let leases = LeaseManager::new(Arc::new(blobs.clone()), "orders", RetryExecutor::no_retry());
        (blobs, leases)
    }

    #[test]
    fn durations_are_clamped() {
        assert_eq!(LeaseManager::clamp_duration(Duration::from_secs(1)), MIN_LEASE_DURATION);
        assert_eq!(LeaseManager::clamp_duration(Duration::from_secs(600)), MAX_LEASE_DURATION);
        assert_eq!(
            LeaseManager::clamp_duration(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn second_acquirer_is_refused() {
        let (_blobs, leases) = seeded().await;

        let mut first = PessimisticConcurrencyContext::new("o-1");
        assert!(leases.acquire(&mut first).await.unwrap());
        assert!(first.has_lock());

        let mut second = PessimisticConcurrencyContext::new("o-1");
        assert!(!leases.acquire(&mut second).await.unwrap());
        assert!(second.lock_id.is_none());
        assert!(logs_contain("lease already held"));
    }

    #[tokio::test]
    async fn missing_objects_need_no_lock() {
        let (_blobs, leases) = seeded().await;
        let mut ctx = PessimisticConcurrencyContext::new("not-there");
        assert!(leases.acquire(&mut ctx).await.unwrap());
        assert!(ctx.lock_id.is_none());
    }

    #[tokio::test]
    async fn release_requires_a_lock_id() {
        let (blobs, leases) = seeded().await;
        let before = blobs.request_count();

        let err = leases
            .release(&PessimisticConcurrencyContext::new("o-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument { .. }));
        assert_eq!(blobs.request_count(), before);
    }

    #[tokio::test]
    async fn released_leases_can_be_retaken() {
        let (_blobs, leases) = seeded().await;

        let mut first = PessimisticConcurrencyContext::new("o-1");
        assert!(leases.acquire(&mut first).await.unwrap());
        tokio_test::assert_ok!(leases.release(&first).await);

        let mut second = PessimisticConcurrencyContext::new("o-1");
        assert!(leases.acquire(&mut second).await.unwrap());
        assert!(second.has_lock());
    }

    #[tokio::test]
    async fn expired_leases_can_be_retaken() {
        let (blobs, leases) = seeded().await;

        let mut first = PessimisticConcurrencyContext::new("o-1");
        assert!(leases.acquire(&mut first).await.unwrap());
        blobs.force_lease_expiry("orders", "o-1");

        let mut second = PessimisticConcurrencyContext::new("o-1");
        assert!(leases.acquire(&mut second).await.unwrap());
        assert_ne!(first.lock_id, second.lock_id);
    }
}
