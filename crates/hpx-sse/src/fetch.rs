//! The HTTP capability consumed by the controller.
//!
//! The controller never talks to the network itself. It hands a
//! [`FetchRequest`] and the attempt's cancellation signal to a [`Fetch`]
//! implementation and gets back either a [`FetchResponse`] with a streaming
//! body or a transport error. [`ReqwestFetch`] is the default implementation;
//! tests and proxies can inject their own.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::{HeaderMap, Method, StatusCode, header::CONTENT_TYPE};
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// Streaming response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// A fully prepared request for one connection attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Final header set, defaults and resumption header included.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<Bytes>,
}

/// Response head plus streaming body.
pub struct FetchResponse {
    /// Response status.
    pub status: StatusCode,
    /// Reason phrase (falls back to the canonical reason for `status`).
    pub status_text: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: ByteStream,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl FetchResponse {
    /// Build a response, deriving `status_text` from the status code.
    pub fn new(status: StatusCode, headers: HeaderMap, body: ByteStream) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            headers,
            body,
        }
    }

    /// The `Content-Type` header, if present and readable.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// Performs HTTP requests on behalf of the controller.
///
/// Implementations should stop work promptly once `signal` is cancelled; any
/// result produced after cancellation is discarded by the caller.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    /// Send `request` and return the response head once it arrives.
    async fn fetch(
        &self,
        request: FetchRequest,
        signal: CancellationToken,
    ) -> Result<FetchResponse, BoxError>;
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_impl::ReqwestFetch;

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use futures_util::{StreamExt, TryStreamExt};
    use tracing::debug;

    use super::*;

    /// [`Fetch`] backed by a [`reqwest::Client`].
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestFetch {
        client: reqwest::Client,
    }

    impl ReqwestFetch {
        /// Create a fetcher with a default client.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a fetcher around an existing client (proxy, TLS settings...).
        #[must_use]
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl Fetch for ReqwestFetch {
        async fn fetch(
            &self,
            request: FetchRequest,
            signal: CancellationToken,
        ) -> Result<FetchResponse, BoxError> {
            let mut builder = self
                .client
                .request(request.method, &request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = tokio::select! {
                biased;

                _ = signal.cancelled() => {
                    debug!(url = %request.url, "Request cancelled before response");
                    return Err("request cancelled".into());
                }
                response = builder.send() => response?,
            };

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes_stream().map_err(BoxError::from).boxed();

            Ok(FetchResponse::new(status, headers, body))
        }
    }
}
