use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

use kestrel_core::StorageResult;

/// Boxed stream used by paged listings
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Opaque version stamp (ETag) issued by the blob service on every write
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(pub String);

impl VersionToken {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VersionToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a time-bounded exclusive lease on one object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub String);

impl LeaseId {
    /// Generate a new proposed lease ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Precondition attached to a write
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessCondition {
    /// Last writer wins
    #[default]
    None,
    /// Current version must equal the token
    IfMatch(VersionToken),
    /// The object must not exist yet
    IfNotExists,
    /// The object must have changed after the instant (absent objects pass)
    IfModifiedSince(DateTime<Utc>),
    /// The caller must hold this active lease
    LeaseHeld(LeaseId),
}

/// Public visibility of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContainerAccess {
    #[default]
    Private,
    /// Anonymous read access to individual objects
    PublicBlob,
}

/// Bytes plus content type, as handed to the blob service
#[derive(Debug, Clone)]
pub struct BlobPayload {
    pub bytes: Bytes,
    pub content_type: String,
}

impl BlobPayload {
    pub fn new<S: Into<String>>(bytes: Bytes, content_type: S) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }
}

/// An object read back together with its current version
#[derive(Debug, Clone)]
pub struct BlobContent {
    pub bytes: Bytes,
    pub content_type: String,
    pub version: VersionToken,
    pub last_modified: DateTime<Utc>,
}

/// Listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub name: String,
    pub size_bytes: u64,
}

/// One page of a container listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<BlobDescriptor>,
    /// Marker for the next page, `None` on the last one
    pub continuation: Option<String>,
}

/// Rejects empty object names before any remote call is made
pub(crate) fn require_object_id(object_id: &str) -> StorageResult<()> {
    if object_id.trim().is_empty() {
        return Err(kestrel_core::StorageError::invalid_argument(
            "object_id",
            "ObjectId cannot be null or empty",
        ));
    }
    Ok(())
}

/// Container name derived from a type: its lowercased short name.
///
/// `my_app::Survey` becomes `survey`, `Vec<u8>` becomes `vec`.
pub fn type_container_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base);
    short.to_lowercase()
}

/// Table name derived from a type: its short name, case preserved
pub fn type_table_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
