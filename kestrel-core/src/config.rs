//! # Kestrel Configuration
//!
//! A small string key/value store. Typed settings (`RetryPolicy`,
//! `StoreConfig`, `ProcessorConfig`) read from an immutable snapshot of it, so
//! applications can layer defaults, files and environment however they like.
//!
//! ```rust
//! use kestrel_core::KestrelConfig;
//!
//! let mut config = KestrelConfig::new();
//! config.set("queue.batch_size", "16");
//!
//! let snapshot = config.snapshot();
//! assert_eq!(snapshot.get_usize("queue.batch_size"), Some(16));
//! ```
//!
//! ## Environment overrides
//!
//! `load_env("KESTREL__")` maps `KESTREL__RETRY__MAX_ATTEMPTS=7` to
//! `retry.max_attempts = 7`. Credentials and account wiring stay with the
//! capability implementations, not here.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct KestrelConfig {
    values: HashMap<String, String>,
}

impl KestrelConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Import every environment variable starting with `prefix`.
    ///
    /// Returns how many keys were set.
    pub fn load_env(&mut self, prefix: &str) -> usize {
        self.load_vars(prefix, std::env::vars())
    }

    /// Same as [`load_env`](Self::load_env) over an explicit variable list.
    pub fn load_vars<I>(&mut self, prefix: &str, vars: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut loaded = 0;
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.values.insert(normalized, value);
                loaded += 1;
            }
        }
        loaded
    }

    pub fn snapshot(&self) -> KestrelConfigSnapshot {
        KestrelConfigSnapshot::new(self.values.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct KestrelConfigSnapshot {
    map: HashMap<String, String>,
}

impl KestrelConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.trim().parse::<u32>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.trim().parse::<bool>().ok())
    }

    /// Milliseconds stored under `key` as a `Duration`
    pub fn get_duration_ms(&self, key: &str) -> Option<Duration> {
        self.get_u64(key).map(Duration::from_millis)
    }
}
