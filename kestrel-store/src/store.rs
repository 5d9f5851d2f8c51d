use async_trait::async_trait;
use std::time::Duration;

use crate::{
    AccessCondition, BlobContent, BlobPayload, ContainerAccess, LeaseId, ListPage, VersionToken,
};
use kestrel_core::StorageResult;

/// Remote blob service operations - implemented by every storage backend.
///
/// Implementations report outcomes through `StorageError` so the retry layer
/// can classify them:
///
/// - missing container or object: `NotFound`
/// - failed precondition, lease held by someone else, lease mismatch: `Conflict`
/// - throttling, timeouts, 5xx: a transient `Remote`/`Transport` error
#[async_trait]
pub trait BlobCapability: Send + Sync {
    /// Create the container if absent. Returns `true` when it was created.
    async fn create_container_if_not_exists(
        &self,
        container: &str,
        access: ContainerAccess,
    ) -> StorageResult<bool>;

    /// Delete a container and everything in it
    async fn delete_container(&self, container: &str) -> StorageResult<()>;

    /// Read an object's bytes and current version
    async fn get(&self, container: &str, name: &str) -> StorageResult<BlobContent>;

    /// Write an object under a precondition, returning the new version
    async fn put(
        &self,
        container: &str,
        name: &str,
        payload: BlobPayload,
        condition: &AccessCondition,
    ) -> StorageResult<VersionToken>;

    /// Delete an object. Returns `false` when there was nothing to delete.
    async fn delete_if_exists(&self, container: &str, name: &str) -> StorageResult<bool>;

    /// List one page of object descriptors starting at `continuation`
    async fn list_page(&self, container: &str, continuation: Option<&str>)
        -> StorageResult<ListPage>;

    /// Acquire (or renew) an exclusive lease using the proposed ID
    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        duration: Duration,
        proposed: &LeaseId,
    ) -> StorageResult<LeaseId>;

    /// Release a lease held under `lease`
    async fn release_lease(&self, container: &str, name: &str, lease: &LeaseId)
        -> StorageResult<()>;
}
