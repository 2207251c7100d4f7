//! The message type produced by the parser.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::constants::DEFAULT_EVENT;

/// A complete SSE message.
///
/// Only produced for blocks that carried at least one `data:` line. An `id:`
/// line with an empty value yields `Some("")`, which is distinct from a block
/// without any `id:` line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Value of the `id:` field, if the block had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Value of the `event:` field, `"message"` when absent.
    pub event: String,
    /// Value of the last `data:` field in the block.
    pub data: String,
    /// Reconnection time in milliseconds advertised by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<i64>,
}

impl Message {
    /// Create a `"message"` event carrying `data`.
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: DEFAULT_EVENT.to_owned(),
            data: data.into(),
            retry: None,
        }
    }

    /// Set the message id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the event name.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    /// Set the retry hint in milliseconds.
    #[must_use]
    pub fn with_retry(mut self, retry: i64) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Check if this message has the given event name.
    #[must_use]
    pub fn is_event(&self, event: &str) -> bool {
        self.event == event
    }

    /// The retry hint as a [`Duration`]. Negative hints yield `None`.
    #[must_use]
    pub fn retry_duration(&self) -> Option<Duration> {
        self.retry
            .and_then(|ms| u64::try_from(ms).ok())
            .map(Duration::from_millis)
    }

    /// Deserialize the data payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults_to_message_event() {
        let message = Message::new("hello");
        assert_eq!(message.event, "message");
        assert_eq!(message.data, "hello");
        assert!(message.id.is_none());
        assert!(message.retry.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let message = Message::new("x")
            .with_id("7")
            .with_event("update")
            .with_retry(1500);
        assert_eq!(message.id.as_deref(), Some("7"));
        assert!(message.is_event("update"));
        assert_eq!(message.retry_duration(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_negative_retry_has_no_duration() {
        let message = Message::new("x").with_retry(-5);
        assert_eq!(message.retry, Some(-5));
        assert!(message.retry_duration().is_none());
    }

    #[test]
    fn test_json_payload() {
        #[derive(Deserialize)]
        struct Tick {
            price: u64,
        }

        let message = Message::new(r#"{"price":42000}"#);
        let tick: Tick = message.json().expect("valid json");
        assert_eq!(tick.price, 42000);
        assert!(Message::new("not json").json::<Tick>().is_err());
    }

    #[test]
    fn test_serde_skips_absent_fields() {
        let encoded = serde_json::to_string(&Message::new("hi")).expect("serialize");
        assert_eq!(encoded, r#"{"event":"message","data":"hi"}"#);

        let decoded: Message =
            serde_json::from_str(r#"{"id":"","event":"message","data":"hi"}"#).expect("decode");
        assert_eq!(decoded.id.as_deref(), Some(""));
        assert!(decoded.retry.is_none());
    }
}
