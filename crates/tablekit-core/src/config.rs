//! Client configuration.
//!
//! [`ClientConfig`] can be built with its typed builder or loaded from
//! `TABLEKIT_*` environment variables via [`ClientConfig::from_env`].

use std::env;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::retry::RetryPolicy;

/// Largest number of keys a single `BatchGetItem` may carry.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Largest number of writes a single `BatchWriteItem` may carry.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Largest number of operations in one transaction.
pub const MAX_TRANSACTION_ITEMS: usize = 100;

/// Client-wide defaults for executors.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct ClientConfig {
    /// Retry policy for throttled single-item and page requests. `None`
    /// surfaces the first throttle.
    #[builder(default = Some(RetryPolicy::default()))]
    pub request_retry: Option<RetryPolicy>,

    /// Retry policy for unprocessed batch items. `None` disables retries.
    #[builder(default = Some(RetryPolicy::default()))]
    pub batch_retry: Option<RetryPolicy>,

    /// Retry policy for transient transaction cancellations and throttles.
    #[builder(default = Some(RetryPolicy::transaction_default()))]
    pub transaction_retry: Option<RetryPolicy>,

    /// Concurrent chunks for parallel batch writes.
    #[builder(default = 5)]
    pub write_concurrency: usize,

    /// Concurrent chunks for parallel batch reads and segmented scans.
    #[builder(default = 4)]
    pub read_concurrency: usize,

    /// Keys per `BatchGetItem` call, capped at 100.
    #[builder(default = MAX_BATCH_GET_KEYS)]
    pub read_chunk_size: usize,

    /// Fan batch chunks out concurrently instead of running them in order.
    #[builder(default = false)]
    pub parallel_batches: bool,

    /// Default for strongly consistent reads.
    #[builder(default = false)]
    pub consistent_read: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_retry: Some(RetryPolicy::default()),
            batch_retry: Some(RetryPolicy::default()),
            transaction_retry: Some(RetryPolicy::transaction_default()),
            write_concurrency: 5,
            read_concurrency: 4,
            read_chunk_size: MAX_BATCH_GET_KEYS,
            parallel_batches: false,
            consistent_read: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TABLEKIT_MAX_RETRIES` | `3` |
    /// | `TABLEKIT_RETRY_INITIAL_DELAY_MS` | `100` |
    /// | `TABLEKIT_RETRY_MAX_DELAY_MS` | `5000` |
    /// | `TABLEKIT_BATCH_MAX_CONCURRENCY` | `5` writes / `4` reads |
    /// | `TABLEKIT_BATCH_PARALLEL` | `false` |
    /// | `TABLEKIT_CONSISTENT_READ` | `false` |
    ///
    /// The retry variables apply to the request and batch policies.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let mut retry = RetryPolicy::default();

        if let Some(n) = parse(&get, "TABLEKIT_MAX_RETRIES") {
            retry.max_retries = n;
        }
        if let Some(ms) = parse(&get, "TABLEKIT_RETRY_INITIAL_DELAY_MS") {
            retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&get, "TABLEKIT_RETRY_MAX_DELAY_MS") {
            retry.max_delay = Duration::from_millis(ms);
        }
        config.request_retry = Some(retry.clone());
        config.batch_retry = Some(retry);

        if let Some(n) = parse::<usize>(&get, "TABLEKIT_BATCH_MAX_CONCURRENCY").filter(|n| *n > 0) {
            config.write_concurrency = n;
            config.read_concurrency = n;
        }
        config.parallel_batches = env_bool(&get, "TABLEKIT_BATCH_PARALLEL", false);
        config.consistent_read = env_bool(&get, "TABLEKIT_CONSISTENT_READ", false);
        config
    }

    /// Effective read chunk size.
    #[must_use]
    pub fn read_chunk(&self) -> usize {
        self.read_chunk_size.clamp(1, MAX_BATCH_GET_KEYS)
    }
}

fn parse<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|v| v.trim().parse().ok())
}

fn env_bool(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    get(key).map_or(default, |v| {
        matches!(v.as_str(), "1" | "true" | "yes" | "TRUE" | "YES")
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_should_create_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.request_retry, Some(RetryPolicy::default()));
        assert_eq!(config.batch_retry, Some(RetryPolicy::default()));
        assert_eq!(
            config.transaction_retry,
            Some(RetryPolicy::transaction_default())
        );
        assert_eq!(config.write_concurrency, 5);
        assert_eq!(config.read_concurrency, 4);
        assert!(!config.parallel_batches);
        assert_eq!(ClientConfig::builder().build(), config);
    }

    #[test]
    fn test_should_load_from_lookup() {
        let vars = HashMap::from([
            ("TABLEKIT_MAX_RETRIES", "5"),
            ("TABLEKIT_RETRY_INITIAL_DELAY_MS", "20"),
            ("TABLEKIT_BATCH_MAX_CONCURRENCY", "8"),
            ("TABLEKIT_BATCH_PARALLEL", "yes"),
            ("TABLEKIT_CONSISTENT_READ", "nope"),
        ]);
        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_owned()));
        assert_eq!(config.request_retry, config.batch_retry);
        let retry = config.batch_retry.unwrap();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(20));
        assert_eq!(retry.max_delay, Duration::from_secs(5));
        assert_eq!(config.write_concurrency, 8);
        assert_eq!(config.read_concurrency, 8);
        assert!(config.parallel_batches);
        assert!(!config.consistent_read);
    }

    #[test]
    fn test_should_load_from_env() {
        let config = ClientConfig::from_env();
        assert!(config.write_concurrency > 0);
    }

    #[test]
    fn test_should_cap_read_chunk() {
        let config = ClientConfig::builder().read_chunk_size(500).build();
        assert_eq!(config.read_chunk(), 100);
        let config = ClientConfig::builder().read_chunk_size(0).build();
        assert_eq!(config.read_chunk(), 1);
    }
}
