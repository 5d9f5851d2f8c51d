//! Concurrency contexts carry the state one reader needs to write back safely.
//!
//! A context is produced by a read (`ObjectStore::get`) or by the caller, and
//! handed to `ObjectStore::save_with`. Its kind selects the write strategy.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::{AccessCondition, LeaseId, VersionToken};

/// Default lease duration for pessimistic contexts
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Registry key for write strategies
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Optimistic,
    Pessimistic,
    Custom(String),
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextKind::Optimistic => write!(f, "optimistic"),
            ContextKind::Pessimistic => write!(f, "pessimistic"),
            ContextKind::Custom(kind) => write!(f, "custom:{}", kind),
        }
    }
}

/// Version-checked write state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticConcurrencyContext {
    pub object_id: String,
    /// Version observed by the read, if the object existed
    pub version: Option<VersionToken>,
    pub condition: AccessCondition,
    /// When the read happened
    pub read_at: DateTime<Utc>,
}

impl OptimisticConcurrencyContext {
    /// Last-writer-wins context
    pub fn unconditional<S: Into<String>>(object_id: S) -> Self {
        Self {
            object_id: object_id.into(),
            version: None,
            condition: AccessCondition::None,
            read_at: Utc::now(),
        }
    }

    /// Write only if the object is still at `version`
    pub fn for_version<S: Into<String>>(object_id: S, version: VersionToken) -> Self {
        Self {
            object_id: object_id.into(),
            condition: AccessCondition::IfMatch(version.clone()),
            version: Some(version),
            read_at: Utc::now(),
        }
    }

    /// Write only if nobody created the object in the meantime
    pub fn for_absent<S: Into<String>>(object_id: S) -> Self {
        Self {
            object_id: object_id.into(),
            version: None,
            condition: AccessCondition::IfNotExists,
            read_at: Utc::now(),
        }
    }

    pub fn with_condition(mut self, condition: AccessCondition) -> Self {
        self.condition = condition;
        self
    }
}

/// Lease-based write state. `lock_id` is filled in by `acquire_lock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PessimisticConcurrencyContext {
    pub object_id: String,
    pub lock_id: Option<LeaseId>,
    pub lease_duration: Duration,
}

impl PessimisticConcurrencyContext {
    pub fn new<S: Into<String>>(object_id: S) -> Self {
        Self {
            object_id: object_id.into(),
            lock_id: None,
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn with_lock_id(mut self, lock_id: LeaseId) -> Self {
        self.lock_id = Some(lock_id);
        self
    }

    /// True when a non-blank lease ID is present
    pub fn has_lock(&self) -> bool {
        self.lock_id.as_ref().is_some_and(|id| !id.is_blank())
    }
}

/// Caller-defined context, routed to a strategy registered for `kind`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomConcurrencyContext {
    pub kind: String,
    pub object_id: String,
    pub properties: BTreeMap<String, String>,
}

impl CustomConcurrencyContext {
    pub fn new<K: Into<String>, S: Into<String>>(kind: K, object_id: S) -> Self {
        Self {
            kind: kind.into(),
            object_id: object_id.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyContext {
    Optimistic(OptimisticConcurrencyContext),
    Pessimistic(PessimisticConcurrencyContext),
    Custom(CustomConcurrencyContext),
}

impl ConcurrencyContext {
    pub fn object_id(&self) -> &str {
        match self {
            ConcurrencyContext::Optimistic(ctx) => &ctx.object_id,
            ConcurrencyContext::Pessimistic(ctx) => &ctx.object_id,
            ConcurrencyContext::Custom(ctx) => &ctx.object_id,
        }
    }

    pub fn kind(&self) -> ContextKind {
        match self {
            ConcurrencyContext::Optimistic(_) => ContextKind::Optimistic,
            ConcurrencyContext::Pessimistic(_) => ContextKind::Pessimistic,
            ConcurrencyContext::Custom(ctx) => ContextKind::Custom(ctx.kind.clone()),
        }
    }
}

impl From<OptimisticConcurrencyContext> for ConcurrencyContext {
    fn from(ctx: OptimisticConcurrencyContext) -> Self {
        ConcurrencyContext::Optimistic(ctx)
    }
}

impl From<PessimisticConcurrencyContext> for ConcurrencyContext {
    fn from(ctx: PessimisticConcurrencyContext) -> Self {
        ConcurrencyContext::Pessimistic(ctx)
    }
}

impl From<CustomConcurrencyContext> for ConcurrencyContext {
    fn from(ctx: CustomConcurrencyContext) -> Self {
        ConcurrencyContext::Custom(ctx)
    }
}
