//! Event source configuration.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    backoff::BackoffConfig,
    fetch::Fetch,
    headers::{HeaderRecord, HeaderSource},
};

/// What happens when the server closes the stream cleanly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    /// Reconnect after every disconnect, clean or not.
    #[default]
    Always,
    /// Reconnect only after failures; a clean end terminates the subscription.
    OnError,
}

impl RetryStrategy {
    /// The wire name of the strategy.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::OnError => "on-error",
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(Self::Always),
            "on-error" => Ok(Self::OnError),
            other => Err(format!("Unknown retry strategy: {other}")),
        }
    }
}

/// Configuration for an [`EventSource`](crate::EventSource).
///
/// Built with chainable setters on top of sensible defaults:
///
/// ```
/// use std::time::Duration;
///
/// use hpx_sse::{EventSourceOptions, RetryStrategy};
///
/// let options = EventSourceOptions::new("https://example.com/events")
///     .max_retry_count(5)
///     .retry_strategy(RetryStrategy::OnError)
///     .timeout(Duration::from_secs(10));
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct EventSourceOptions {
    /// SSE endpoint URL.
    pub url: String,
    /// HTTP method (usually GET, some APIs use POST).
    pub method: http::Method,
    /// Request headers, resolved again for every attempt.
    pub headers: HeaderSource,
    /// Optional request body (for POST-based SSE).
    pub body: Option<Bytes>,
    /// HTTP capability override. `None` uses the default client.
    pub fetch: Option<Arc<dyn Fetch>>,
    /// Maximum number of consecutive failed attempts (None = infinite).
    pub max_retry_count: Option<u32>,
    /// Upper bound for the reconnection delay.
    pub max_retry_interval: Duration,
    /// Delay before the first reconnection attempt.
    pub min_retry_interval: Duration,
    /// Random jitter factor (0.0-1.0) for reconnection delays.
    pub retry_jitter: f64,
    /// Behaviour on a clean end of stream.
    pub retry_strategy: RetryStrategy,
    /// Time allowed for a response to arrive (None = wait forever).
    pub timeout: Option<Duration>,
}

impl Default for EventSourceOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: http::Method::GET,
            headers: HeaderSource::default(),
            body: None,
            fetch: None,
            max_retry_count: None,
            max_retry_interval: Duration::from_millis(30_000),
            min_retry_interval: Duration::from_millis(2),
            retry_jitter: 0.0,
            retry_strategy: RetryStrategy::Always,
            timeout: None,
        }
    }
}

impl fmt::Debug for EventSourceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSourceOptions")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(Bytes::len))
            .field("fetch", &self.fetch.as_ref().map(|_| "<custom>"))
            .field("max_retry_count", &self.max_retry_count)
            .field("max_retry_interval", &self.max_retry_interval)
            .field("min_retry_interval", &self.min_retry_interval)
            .field("retry_jitter", &self.retry_jitter)
            .field("retry_strategy", &self.retry_strategy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EventSourceOptions {
    /// Create options for the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the HTTP method (e.g., `POST` for POST-based SSE).
    #[must_use]
    pub fn method(mut self, method: http::Method) -> Self {
        self.method = method;
        self
    }

    /// Set the header source.
    #[must_use]
    pub fn headers(mut self, headers: impl Into<HeaderSource>) -> Self {
        self.headers = headers.into();
        self
    }

    /// Add one static header, switching to a static source if needed.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut record = match self.headers {
            HeaderSource::Static(record) => record,
            _ => HeaderRecord::new(),
        };
        record.insert(name.into(), Some(value.into()));
        self.headers = HeaderSource::Static(record);
        self
    }

    /// Set the request body (for POST-based SSE).
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Use a custom HTTP capability.
    #[must_use]
    pub fn fetch(mut self, fetch: impl Fetch) -> Self {
        self.fetch = Some(Arc::new(fetch));
        self
    }

    /// Use a shared custom HTTP capability.
    #[must_use]
    pub fn fetch_arc(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    /// Set the maximum number of consecutive failed attempts.
    #[must_use]
    pub fn max_retry_count(mut self, count: u32) -> Self {
        self.max_retry_count = Some(count);
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn max_retry_interval(mut self, interval: Duration) -> Self {
        self.max_retry_interval = interval;
        self
    }

    /// Set the delay before the first reconnection attempt.
    #[must_use]
    pub fn min_retry_interval(mut self, interval: Duration) -> Self {
        self.min_retry_interval = interval;
        self
    }

    /// Set the reconnection jitter factor.
    #[must_use]
    pub fn retry_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = jitter;
        self
    }

    /// Set the retry strategy.
    #[must_use]
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Set the response timeout.
    ///
    /// The timer starts when an attempt begins, so it also covers header
    /// resolution and the `on_request` hook. It stops once a response head
    /// arrives, whatever its status.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.min_retry_interval,
            max_delay: self.max_retry_interval,
            factor: 2.0,
            jitter: self.retry_jitter,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| format!("Invalid URL: {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("Unsupported URL scheme: {}", parsed.scheme()));
        }
        if self.max_retry_count == Some(0) {
            return Err("Max retry count must be > 0".to_string());
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err("Timeout must be > 0".to_string());
        }
        self.backoff().validate()?;
        if self.fetch.is_none() && !cfg!(feature = "reqwest") {
            return Err("No fetch implementation: enable the `reqwest` feature".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = EventSourceOptions::default();
        assert!(options.url.is_empty());
        assert_eq!(options.method, http::Method::GET);
        assert!(options.body.is_none());
        assert!(options.fetch.is_none());
        assert!(options.max_retry_count.is_none());
        assert_eq!(options.max_retry_interval, Duration::from_secs(30));
        assert_eq!(options.min_retry_interval, Duration::from_millis(2));
        assert_eq!(options.retry_jitter, 0.0);
        assert_eq!(options.retry_strategy, RetryStrategy::Always);
        assert!(options.timeout.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let options = EventSourceOptions::new("https://api.example.com/stream")
            .method(http::Method::POST)
            .header("Authorization", "Bearer token")
            .header("X-Api-Key", "key")
            .body(&b"{\"channels\":[\"trades\"]}"[..])
            .max_retry_count(5)
            .max_retry_interval(Duration::from_secs(10))
            .min_retry_interval(Duration::from_millis(50))
            .retry_jitter(0.2)
            .retry_strategy(RetryStrategy::OnError)
            .timeout(Duration::from_secs(3));

        assert_eq!(options.url, "https://api.example.com/stream");
        assert_eq!(options.method, http::Method::POST);
        match &options.headers {
            HeaderSource::Static(record) => {
                assert_eq!(record.len(), 2);
                assert_eq!(
                    record.get("Authorization"),
                    Some(&Some("Bearer token".to_string()))
                );
            }
            other => panic!("expected static headers, got {other:?}"),
        }
        assert_eq!(
            options.body.as_deref(),
            Some(b"{\"channels\":[\"trades\"]}".as_slice())
        );
        assert_eq!(options.max_retry_count, Some(5));
        assert_eq!(options.retry_strategy, RetryStrategy::OnError);
        assert_eq!(options.timeout, Some(Duration::from_secs(3)));

        let backoff = options.backoff();
        assert_eq!(backoff.initial_delay, Duration::from_millis(50));
        assert_eq!(backoff.max_delay, Duration::from_secs(10));
        assert_eq!(backoff.factor, 2.0);
        assert_eq!(backoff.jitter, 0.2);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validation_url() {
        let result = EventSourceOptions::default().validate();
        assert_eq!(result.expect_err("should fail"), "URL cannot be empty");

        let result = EventSourceOptions::new("not a url").validate();
        assert!(result.expect_err("should fail").starts_with("Invalid URL"));

        let result = EventSourceOptions::new("ftp://example.com/feed").validate();
        assert_eq!(result.expect_err("should fail"), "Unsupported URL scheme: ftp");
    }

    #[test]
    fn test_validation_zero_max_retry_count() {
        let result = EventSourceOptions::new("https://example.com")
            .max_retry_count(0)
            .validate();
        assert_eq!(result.expect_err("should fail"), "Max retry count must be > 0");
    }

    #[test]
    fn test_validation_intervals() {
        let result = EventSourceOptions::new("https://example.com")
            .min_retry_interval(Duration::from_secs(5))
            .max_retry_interval(Duration::from_secs(1))
            .validate();
        assert_eq!(
            result.expect_err("should fail"),
            "Max retry interval must be >= min retry interval"
        );

        let result = EventSourceOptions::new("https://example.com")
            .min_retry_interval(Duration::ZERO)
            .validate();
        assert_eq!(result.expect_err("should fail"), "Min retry interval must be > 0");
    }

    #[test]
    fn test_validation_jitter_and_timeout() {
        let result = EventSourceOptions::new("https://example.com")
            .retry_jitter(1.5)
            .validate();
        assert_eq!(
            result.expect_err("should fail"),
            "Jitter must be between 0.0 and 1.0"
        );

        let result = EventSourceOptions::new("https://example.com")
            .timeout(Duration::ZERO)
            .validate();
        assert_eq!(result.expect_err("should fail"), "Timeout must be > 0");

        // Boundaries are valid
        assert!(
            EventSourceOptions::new("https://example.com")
                .retry_jitter(1.0)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_retry_strategy_names() {
        assert_eq!("always".parse::<RetryStrategy>(), Ok(RetryStrategy::Always));
        assert_eq!("on-error".parse::<RetryStrategy>(), Ok(RetryStrategy::OnError));
        assert!("sometimes".parse::<RetryStrategy>().is_err());
        assert_eq!(RetryStrategy::OnError.to_string(), "on-error");

        let json = serde_json::to_string(&RetryStrategy::OnError).expect("serialize");
        assert_eq!(json, "\"on-error\"");
        let parsed: RetryStrategy = serde_json::from_str("\"always\"").expect("deserialize");
        assert_eq!(parsed, RetryStrategy::Always);
    }
}
