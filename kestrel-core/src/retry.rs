//! # Retry policies
//!
//! Remote storage is only eventually available. Every store and queue call is
//! routed through a [`RetryExecutor`], which repeats an operation while its
//! failure is classified as transient and gives up immediately otherwise.
//!
//! ```rust
//! use std::time::Duration;
//! use kestrel_core::{Backoff, RetryExecutor, RetryPolicy, StorageError};
//!
//! # tokio_test::block_on(async {
//! let executor = RetryExecutor::new(RetryPolicy::new(3, Backoff::Fixed(Duration::ZERO)));
//! let mut calls = 0;
//! let value = executor
//!     .execute(|| {
//!         calls += 1;
//!         let attempt = calls;
//!         async move {
//!             if attempt < 3 {
//!                 Err(StorageError::remote(503, "server busy"))
//!             } else {
//!                 Ok(attempt)
//!             }
//!         }
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(value, 3);
//! # });
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::config::KestrelConfigSnapshot;
use crate::errors::{StorageError, StorageResult};

/// Decides whether a failure is worth another attempt
pub trait TransientErrorDetection: Send + Sync {
    fn is_transient(&self, error: &StorageError) -> bool;
}

/// Default detection: only [`FailureClass::Transient`](crate::FailureClass::Transient) failures are retried.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageTransientErrorDetection;

impl TransientErrorDetection for StorageTransientErrorDetection {
    fn is_transient(&self, error: &StorageError) -> bool {
        error.is_transient()
    }
}

/// Delay schedule between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),

    /// `initial`, then `initial + increment`, `initial + 2 * increment`, ...
    Incremental { initial: Duration, increment: Duration },

    /// `min + (2^n - 1) * delta` with +/-20% jitter on `delta`, capped at `max`
    Exponential {
        min: Duration,
        max: Duration,
        delta: Duration,
    },
}

impl Backoff {
    /// Delay to wait before retry number `retry` (the first retry is 1).
    pub fn delay(&self, retry: u32) -> Duration {
        let n = retry.saturating_sub(1);
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Incremental { initial, increment } => {
                initial.saturating_add(increment.saturating_mul(n))
            }
            Backoff::Exponential { min, max, delta } => {
                let jitter: f64 = rand::thread_rng().gen_range(0.8..=1.2);
                let factor = 2f64.powi(n.min(62) as i32) - 1.0;
                let millis = min.as_millis() as f64 + factor * delta.as_millis() as f64 * jitter;
                let capped = millis.min(max.as_millis() as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            min: Duration::from_secs(1),
            max: Duration::from_secs(30),
            delta: Duration::from_secs(2),
        }
    }
}

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Build a policy from `retry.*` keys, falling back to defaults per key.
    ///
    /// Recognised keys: `retry.max_attempts`, `retry.strategy`
    /// (`fixed` | `incremental` | `exponential`), `retry.min_backoff_ms`,
    /// `retry.max_backoff_ms`, `retry.delta_backoff_ms`.
    pub fn from_config(config: &KestrelConfigSnapshot) -> StorageResult<Self> {
        let defaults = Self::default();
        let max_attempts = config.get_u32("retry.max_attempts").unwrap_or(defaults.max_attempts);

        let min = config
            .get_duration_ms("retry.min_backoff_ms")
            .unwrap_or(Duration::from_secs(1));
        let max = config
            .get_duration_ms("retry.max_backoff_ms")
            .unwrap_or(Duration::from_secs(30));
        let delta = config
            .get_duration_ms("retry.delta_backoff_ms")
            .unwrap_or(Duration::from_secs(2));

        let backoff = match config.get("retry.strategy").unwrap_or("exponential") {
            "fixed" => Backoff::Fixed(min),
            "incremental" => Backoff::Incremental {
                initial: min,
                increment: delta,
            },
            "exponential" => Backoff::Exponential { min, max, delta },
            other => {
                return Err(StorageError::Configuration(format!(
                    "unknown retry.strategy '{}'",
                    other
                )))
            }
        };

        Ok(Self::new(max_attempts, backoff))
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    detector: Arc<dyn TransientErrorDetection>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            detector: Arc::new(StorageTransientErrorDetection),
        }
    }

    pub fn no_retry() -> Self {
        Self::new(RetryPolicy::no_retry())
    }

    /// Replace the transient error detection
    pub fn with_detection<D: TransientErrorDetection + 'static>(mut self, detector: D) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, retrying transient failures per policy.
    ///
    /// Non-transient failures are returned on first sight. When attempts run
    /// out, the last failure is returned unchanged.
    pub async fn execute<F, Fut, R>(&self, mut operation: F) -> StorageResult<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<R>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "storage operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !self.detector.is_transient(&err) => return Err(err),
                Err(err) => {
                    if attempt >= max_attempts {
                        error!(
                            attempts = attempt,
                            status = err.status_code(),
                            error = %err,
                            "storage operation failed, retry attempts exhausted"
                        );
                        return Err(err);
                    }

                    let delay = self.policy.backoff.delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        status = err.status_code(),
                        error = %err,
                        "transient storage failure, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
