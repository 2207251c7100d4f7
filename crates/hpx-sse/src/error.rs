//! Error handling for the SSE client.

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a [`Fetch`](crate::fetch::Fetch) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main result type used throughout the crate.
pub type SseResult<T> = Result<T, SseError>;

/// Errors observed while driving an SSE subscription.
#[derive(Error, Debug)]
pub enum SseError {
    /// The request never produced a response (DNS, refused connection, TLS...).
    #[error("Request error: {0}")]
    Request(#[source] BoxError),

    /// The server answered with a non-2xx status.
    #[error("Received {{ STATUS_CODE: {} STATUS_TEXT: {status_text} }}", .status.as_u16())]
    Status {
        status: http::StatusCode,
        status_text: String,
    },

    /// The server answered 2xx but not with an event stream.
    #[error("Expected server to respond with Content-Type: 'text/event-stream'. Got '{}'", .content_type.as_deref().unwrap_or("none"))]
    ContentType { content_type: Option<String> },

    /// Reading the response body failed mid-stream.
    #[error("Stream error: {0}")]
    Stream(#[source] BoxError),

    /// No response arrived within the configured timeout.
    #[error("Timeout of {}ms exceeded", .duration.as_millis())]
    Timeout { duration: Duration },

    /// The retry budget is spent.
    #[error("Max retry count reached ({count})")]
    MaxRetries { count: u32 },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl SseError {
    /// Create a request (transport) error.
    pub fn request(source: impl Into<BoxError>) -> Self {
        Self::Request(source.into())
    }

    /// Create a status error.
    pub fn status(status: http::StatusCode, status_text: impl Into<String>) -> Self {
        Self::Status {
            status,
            status_text: status_text.into(),
        }
    }

    /// Create a content-type error.
    pub fn content_type(content_type: Option<&str>) -> Self {
        Self::ContentType {
            content_type: content_type.map(str::to_owned),
        }
    }

    /// Create a body stream error.
    pub fn stream(source: impl Into<BoxError>) -> Self {
        Self::Stream(source.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the controller retries after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::Status { .. } | Self::ContentType { .. } | Self::Stream(_)
        )
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<http::StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
