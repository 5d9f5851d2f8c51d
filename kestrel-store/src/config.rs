use std::time::Duration;

use crate::{lease::LeaseManager, ContainerAccess, DEFAULT_LEASE_DURATION};
use kestrel_core::{KestrelConfigSnapshot, RetryPolicy, StorageResult};

/// Configuration for an object store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Lease length used by `ObjectStore::lock_context` (clamped to 15..=60s)
    pub lease_duration: Duration,

    /// Containers are created with anonymous read access to objects
    pub public_access: bool,

    /// Retry policy applied to every remote call
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            public_access: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set lease duration
    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = LeaseManager::clamp_duration(duration);
        self
    }

    /// Create containers with public read access to objects
    pub fn with_public_access(mut self) -> Self {
        self.public_access = true;
        self
    }

    /// Set retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn container_access(&self) -> ContainerAccess {
        if self.public_access {
            ContainerAccess::PublicBlob
        } else {
            ContainerAccess::Private
        }
    }

    /// Read `store.*` and `retry.*` keys, keeping defaults for absent ones
    pub fn from_config(config: &KestrelConfigSnapshot) -> StorageResult<Self> {
        let mut store = Self::new().with_retry_policy(RetryPolicy::from_config(config)?);

        if let Some(duration) = config.get_duration_ms("store.lease_duration_ms") {
            store = store.with_lease_duration(duration);
        }
        if let Some(public) = config.get_bool("store.public_access") {
            store.public_access = public;
        }

        Ok(store)
    }
}
