use thiserror::Error;

use kestrel_core::StorageError;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors for queue and batch processor operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Failure reported by the queue service (after retries)
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument { name: String, message: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn invalid_argument<N: Into<String>, S: Into<String>>(name: N, message: S) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// The underlying service error, if any
    pub fn storage(&self) -> Option<&StorageError> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.storage().is_some_and(StorageError::is_not_found)
    }

    pub fn is_transient(&self) -> bool {
        self.storage().is_some_and(StorageError::is_transient)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
