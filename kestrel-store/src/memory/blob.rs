use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    AccessCondition, BlobCapability, BlobContent, BlobDescriptor, BlobPayload, ContainerAccess,
    LeaseId, ListPage, VersionToken,
};
use kestrel_core::{StorageError, StorageResult};

const DEFAULT_PAGE_SIZE: usize = 5000;

struct ActiveLease {
    id: LeaseId,
    expires_at: DateTime<Utc>,
}

struct StoredBlob {
    bytes: Bytes,
    content_type: String,
    version: VersionToken,
    last_modified: DateTime<Utc>,
    lease: Option<ActiveLease>,
}

impl StoredBlob {
    fn active_lease(&self, now: DateTime<Utc>) -> Option<&ActiveLease> {
        self.lease.as_ref().filter(|lease| lease.expires_at > now)
    }
}

struct MemoryContainer {
    access: ContainerAccess,
    blobs: BTreeMap<String, StoredBlob>,
}

/// In-memory blob service for testing and development.
///
/// Clones share state. Mirrors the remote service's lease and precondition
/// rules closely enough to exercise every concurrency path, and exposes
/// hooks to force lease expiry and inject failures.
#[derive(Clone)]
pub struct MemoryBlobService {
    containers: Arc<RwLock<HashMap<String, MemoryContainer>>>,
    injected: Arc<Mutex<VecDeque<StorageError>>>,
    versions: Arc<AtomicU64>,
    requests: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    page_size: usize,
}

impl MemoryBlobService {
    pub fn new() -> Self {
        Self {
            containers: Arc::new(RwLock::new(HashMap::new())),
            injected: Arc::new(Mutex::new(VecDeque::new())),
            versions: Arc::new(AtomicU64::new(1)),
            requests: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Limit listing pages to `page_size` entries
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The next calls fail with these errors, one per call, in order
    pub fn inject_failures<I: IntoIterator<Item = StorageError>>(&self, errors: I) {
        self.injected.lock().extend(errors);
    }

    /// Make any lease on the object lapse immediately
    pub fn force_lease_expiry(&self, container: &str, name: &str) {
        let mut containers = self.containers.write();
        if let Some(blob) = containers
            .get_mut(container)
            .and_then(|c| c.blobs.get_mut(name))
        {
            if let Some(lease) = blob.lease.as_mut() {
                lease.expires_at = Utc::now() - chrono::Duration::seconds(1);
            }
        }
    }

    /// Calls received, including failed ones
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// `put` calls received
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn container_access(&self, container: &str) -> Option<ContainerAccess> {
        self.containers.read().get(container).map(|c| c.access)
    }

    pub fn contains(&self, container: &str, name: &str) -> bool {
        self.containers
            .read()
            .get(container)
            .is_some_and(|c| c.blobs.contains_key(name))
    }

    /// Count the call and surface an injected failure, if one is queued
    fn begin(&self) -> StorageResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.injected.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_version(&self) -> VersionToken {
        let n = self.versions.fetch_add(1, Ordering::SeqCst);
        VersionToken(format!("\"0x{:016X}\"", n))
    }
}

impl Default for MemoryBlobService {
    fn default() -> Self {
        Self::new()
    }
}

fn check_condition(
    name: &str,
    existing: Option<&StoredBlob>,
    condition: &AccessCondition,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    let lease = existing.and_then(|blob| blob.active_lease(now));
    match (lease, condition) {
        (Some(active), AccessCondition::LeaseHeld(id)) if active.id == *id => {}
        (Some(_), AccessCondition::LeaseHeld(_)) => {
            return Err(StorageError::conflict(name, "lease ID does not match the active lease"))
        }
        (Some(_), _) => {
            return Err(StorageError::conflict(
                name,
                "there is currently a lease on the object and no lease ID was specified",
            ))
        }
        (None, AccessCondition::LeaseHeld(_)) => {
            return Err(StorageError::conflict(name, "there is no active lease on the object"))
        }
        (None, _) => {}
    }

    let satisfied = match condition {
        AccessCondition::None | AccessCondition::LeaseHeld(_) => true,
        AccessCondition::IfMatch(version) => existing.is_some_and(|blob| blob.version == *version),
        AccessCondition::IfNotExists => existing.is_none(),
        AccessCondition::IfModifiedSince(since) => {
            existing.map_or(true, |blob| blob.last_modified > *since)
        }
    };

    if satisfied {
        Ok(())
    } else {
        Err(StorageError::remote(412, format!("condition {:?} not met for '{}'", condition, name)))
    }
}

#[async_trait]
impl BlobCapability for MemoryBlobService {
    async fn create_container_if_not_exists(
        &self,
        container: &str,
        access: ContainerAccess,
    ) -> StorageResult<bool> {
        self.begin()?;
        let mut containers = self.containers.write();
        if containers.contains_key(container) {
            return Ok(false);
        }
        containers.insert(
            container.to_string(),
            MemoryContainer {
                access,
                blobs: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn delete_container(&self, container: &str) -> StorageResult<()> {
        self.begin()?;
        self.containers
            .write()
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(container))
    }

    async fn get(&self, container: &str, name: &str) -> StorageResult<BlobContent> {
        self.begin()?;
        let containers = self.containers.read();
        let blob = containers
            .get(container)
            .ok_or_else(|| StorageError::not_found(container))?
            .blobs
            .get(name)
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", container, name)))?;

        Ok(BlobContent {
            bytes: blob.bytes.clone(),
            content_type: blob.content_type.clone(),
            version: blob.version.clone(),
            last_modified: blob.last_modified,
        })
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        payload: BlobPayload,
        condition: &AccessCondition,
    ) -> StorageResult<VersionToken> {
        self.begin()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let now = Utc::now();
        let mut containers = self.containers.write();
        let target = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::not_found(container))?;

        let existing = target.blobs.get_mut(name);
        check_condition(name, existing.as_deref(), condition, now)?;

        let version = self.next_version();
        match existing {
            Some(blob) => {
                blob.bytes = payload.bytes;
                blob.content_type = payload.content_type;
                blob.version = version.clone();
                blob.last_modified = now;
            }
            None => {
                target.blobs.insert(
                    name.to_string(),
                    StoredBlob {
                        bytes: payload.bytes,
                        content_type: payload.content_type,
                        version: version.clone(),
                        last_modified: now,
                        lease: None,
                    },
                );
            }
        }
        Ok(version)
    }

    async fn delete_if_exists(&self, container: &str, name: &str) -> StorageResult<bool> {
        self.begin()?;
        let mut containers = self.containers.write();
        let target = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::not_found(container))?;
        Ok(target.blobs.remove(name).is_some())
    }

    async fn list_page(
        &self,
        container: &str,
        continuation: Option<&str>,
    ) -> StorageResult<ListPage> {
        self.begin()?;
        let containers = self.containers.read();
        let target = containers
            .get(container)
            .ok_or_else(|| StorageError::not_found(container))?;

        let start = continuation.unwrap_or_default().to_string();
        let mut remaining = target.blobs.range(start..);
        let items: Vec<BlobDescriptor> = remaining
            .by_ref()
            .take(self.page_size)
            .map(|(name, blob)| BlobDescriptor {
                name: name.clone(),
                size_bytes: blob.bytes.len() as u64,
            })
            .collect();
        let continuation = remaining.next().map(|(name, _)| name.clone());

        Ok(ListPage {
            items,
            continuation,
        })
    }

    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        duration: Duration,
        proposed: &LeaseId,
    ) -> StorageResult<LeaseId> {
        self.begin()?;
        let now = Utc::now();
        let mut containers = self.containers.write();
        let blob = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::not_found(container))?
            .blobs
            .get_mut(name)
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", container, name)))?;

        if let Some(active) = blob.active_lease(now) {
            if active.id != *proposed {
                return Err(StorageError::remote(
                    409,
                    format!("there is already a lease present on '{}'", name),
                ));
            }
        }

        let ttl = chrono::Duration::from_std(duration)
            .map_err(|e| StorageError::invalid_argument("duration", e.to_string()))?;
        blob.lease = Some(ActiveLease {
            id: proposed.clone(),
            expires_at: now + ttl,
        });
        Ok(proposed.clone())
    }

    async fn release_lease(&self, container: &str, name: &str, lease: &LeaseId) -> StorageResult<()> {
        self.begin()?;
        let mut containers = self.containers.write();
        let blob = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::not_found(container))?
            .blobs
            .get_mut(name)
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", container, name)))?;

        match &blob.lease {
            Some(held) if held.id == *lease => {
                blob.lease = None;
                Ok(())
            }
            _ => Err(StorageError::remote(
                409,
                format!("lease ID does not match the lease on '{}'", name),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(text: &'static str) -> BlobPayload {
        BlobPayload::new(Bytes::from_static(text.as_bytes()), "application/json")
    }

    async fn service() -> MemoryBlobService {
        let blobs = MemoryBlobService::new();
        blobs
            .create_container_if_not_exists("c", ContainerAccess::Private)
            .await
            .unwrap();
        blobs
    }

    #[tokio::test]
    async fn writes_bump_the_version() {
        let blobs = service().await;
        let v1 = blobs.put("c", "a", json("1"), &AccessCondition::None).await.unwrap();
        let v2 = blobs.put("c", "a", json("2"), &AccessCondition::None).await.unwrap();
        assert_ne!(v1, v2);
        assert_eq!(blobs.get("c", "a").await.unwrap().version, v2);
    }

    #[tokio::test]
    async fn preconditions_are_enforced() {
        let blobs = service().await;
        let v1 = blobs.put("c", "a", json("1"), &AccessCondition::IfNotExists).await.unwrap();

        let err = blobs
            .put("c", "a", json("2"), &AccessCondition::IfNotExists)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        blobs
            .put("c", "a", json("2"), &AccessCondition::IfMatch(v1.clone()))
            .await
            .unwrap();
        let err = blobs
            .put("c", "a", json("3"), &AccessCondition::IfMatch(v1))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn modified_since_checks_the_last_write() {
        let blobs = service().await;
        let before = Utc::now() - chrono::Duration::seconds(5);
        blobs.put("c", "a", json("1"), &AccessCondition::None).await.unwrap();

        blobs
            .put("c", "a", json("2"), &AccessCondition::IfModifiedSince(before))
            .await
            .unwrap();
        let later = Utc::now() + chrono::Duration::seconds(5);
        let err = blobs
            .put("c", "a", json("3"), &AccessCondition::IfModifiedSince(later))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn leased_objects_refuse_unleased_writes() {
        let blobs = service().await;
        blobs.put("c", "a", json("1"), &AccessCondition::None).await.unwrap();

        let lease = LeaseId::generate();
        blobs
            .acquire_lease("c", "a", Duration::from_secs(30), &lease)
            .await
            .unwrap();

        let err = blobs.put("c", "a", json("2"), &AccessCondition::None).await.unwrap_err();
        assert!(err.is_conflict());
        blobs
            .put("c", "a", json("2"), &AccessCondition::LeaseHeld(lease.clone()))
            .await
            .unwrap();

        blobs.force_lease_expiry("c", "a");
        let err = blobs
            .put("c", "a", json("3"), &AccessCondition::LeaseHeld(lease))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn listing_pages_until_exhausted() {
        let blobs = service().await.with_page_size(2);
        for name in ["a", "b", "c", "d", "e"] {
            blobs.put("c", name, json("{}"), &AccessCondition::None).await.unwrap();
        }

        let first = blobs.list_page("c", None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.continuation.as_deref(), Some("c"));

        let last = blobs.list_page("c", Some("e")).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.continuation.is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let blobs = service().await;
        blobs.inject_failures(vec![
            StorageError::remote(503, "busy"),
            StorageError::remote(500, "oops"),
        ]);

        assert_eq!(blobs.get("c", "x").await.unwrap_err().status_code(), 503);
        assert_eq!(blobs.get("c", "x").await.unwrap_err().status_code(), 500);
        assert!(blobs.get("c", "x").await.unwrap_err().is_not_found());
        assert_eq!(blobs.request_count(), 4);
    }
}
