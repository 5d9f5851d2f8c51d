//! # Errors
//!
//! Every remote capability and every store operation reports failures as a
//! [`StorageError`]. The retry executor never inspects error messages; it asks
//! the error for its [`FailureClass`]:
//!
//! - `NotFound`  - the addressed object/container/message does not exist
//! - `Conflict`  - version or lease mismatch, or a lease already held
//! - `Transient` - expected to succeed if repeated (throttling, timeouts, blips)
//! - `Fatal`     - caller or configuration mistakes, malformed requests
//!
//! Only `Transient` failures are retried. Not-found and conflict outcomes are
//! returned to the calling operation, which decides whether they are an error
//! at all (a missing blob on `get`, a held lease on `acquire_lock`).

use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Classification used by retry policies and by callers that branch on outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    NotFound,
    Conflict,
    Transient,
    Fatal,
}

impl FailureClass {
    pub fn name(&self) -> &'static str {
        match self {
            FailureClass::NotFound => "not-found",
            FailureClass::Conflict => "conflict",
            FailureClass::Transient => "transient",
            FailureClass::Fatal => "fatal",
        }
    }
}

/// Errors produced by remote capabilities and the layers built on them
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Concurrency conflict on '{resource}': {reason}")]
    ConcurrencyConflict { resource: String, reason: String },

    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument { name: String, message: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A write was attempted with a concurrency context kind nobody registered
    #[error("No write strategy registered for concurrency context kind '{kind}'")]
    StrategyNotRegistered { kind: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The remote service answered with a failure status
    #[error("Remote service error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The request never got an answer (connection reset, DNS, socket timeout)
    #[error("Transport error: {0}")]
    Transport(String),
}

impl StorageError {
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict<R: Into<String>, S: Into<String>>(resource: R, reason: S) -> Self {
        Self::ConcurrencyConflict {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_argument<N: Into<String>, S: Into<String>>(name: N, message: S) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        Self::InvalidOperation(message.into())
    }

    pub fn remote<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    pub fn serialization<E: std::fmt::Display>(error: E) -> Self {
        Self::Serialization(error.to_string())
    }

    /// Classify this error for retry and branching decisions.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::NotFound { .. } => FailureClass::NotFound,
            Self::ConcurrencyConflict { .. } => FailureClass::Conflict,
            Self::Transport(_) => FailureClass::Transient,
            Self::Remote { status, .. } => match *status {
                404 => FailureClass::NotFound,
                409 | 412 => FailureClass::Conflict,
                408 | 429 => FailureClass::Transient,
                s if s >= 500 => FailureClass::Transient,
                _ => FailureClass::Fatal,
            },
            Self::InvalidArgument { .. }
            | Self::InvalidOperation(_)
            | Self::StrategyNotRegistered { .. }
            | Self::Configuration(_)
            | Self::Serialization(_) => FailureClass::Fatal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.failure_class() == FailureClass::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.failure_class() == FailureClass::Conflict
    }

    pub fn is_transient(&self) -> bool {
        self.failure_class() == FailureClass::Transient
    }

    /// HTTP-like status code, used for log fields.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::ConcurrencyConflict { .. } => 409,
            Self::InvalidArgument { .. } => 400,
            Self::InvalidOperation(_) => 400,
            Self::StrategyNotRegistered { .. } => 501,
            Self::Configuration(_) => 500,
            Self::Serialization(_) => 422,
            Self::Remote { status, .. } => *status,
            Self::Transport(_) => 503,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
