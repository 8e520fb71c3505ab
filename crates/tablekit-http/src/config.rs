//! HTTP transport configuration.

use std::env;
use std::time::Duration;

use typed_builder::TypedBuilder;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:4566";

/// Where and how the HTTP transport talks to the store.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct HttpTransportConfig {
    /// Base URL; every request is a `POST` to it.
    #[builder(default = DEFAULT_ENDPOINT_URL.to_owned(), setter(into))]
    pub endpoint_url: String,

    /// Reject responses whose body does not match `x-amz-crc32`.
    #[builder(default = true)]
    pub verify_crc32: bool,

    /// Whole-request timeout. `None` leaves it to the HTTP client.
    #[builder(default, setter(strip_option))]
    pub request_timeout: Option<Duration>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HttpTransportConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TABLEKIT_ENDPOINT_URL` | `http://localhost:4566` |
    /// | `TABLEKIT_VERIFY_CRC32` | `true` |
    /// | `TABLEKIT_REQUEST_TIMEOUT_MS` | unset |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = get("TABLEKIT_ENDPOINT_URL").filter(|v| !v.trim().is_empty()) {
            config.endpoint_url = url.trim().to_owned();
        }
        config.verify_crc32 = env_bool(&get, "TABLEKIT_VERIFY_CRC32", true);
        config.request_timeout = get("TABLEKIT_REQUEST_TIMEOUT_MS")
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_millis);
        config
    }
}

fn env_bool(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    get(key).map_or(default, |v| {
        matches!(v.trim(), "1" | "true" | "yes" | "TRUE" | "YES")
    })
}
