//! Request header sources.
//!
//! Headers may be a fixed map, or be produced per attempt by a synchronous or
//! asynchronous function (for example to refresh an access token before every
//! reconnection). Entries whose value is `None` are left out of the request.

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use futures_util::future::BoxFuture;
use http::{
    HeaderMap, HeaderValue,
    header::{ACCEPT, HeaderName},
};
use tracing::warn;

/// Media type of an SSE response body.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Header used to resume a stream after the last received event.
pub const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

/// Header name to optional value. `None` means "omit this header".
///
/// Keys are case-sensitive, so a record may name the same header twice in
/// different cases; every such entry is sent as a separate value.
pub type HeaderRecord = HashMap<String, Option<String>>;

type SyncHeaderFn = dyn Fn() -> HeaderRecord + Send + Sync;
type AsyncHeaderFn = dyn Fn() -> BoxFuture<'static, HeaderRecord> + Send + Sync;

/// Where request headers come from.
#[derive(Clone)]
pub enum HeaderSource {
    /// A fixed set of headers.
    Static(HeaderRecord),
    /// Called once per connection attempt.
    Sync(Arc<SyncHeaderFn>),
    /// Awaited once per connection attempt.
    Async(Arc<AsyncHeaderFn>),
}

impl Default for HeaderSource {
    fn default() -> Self {
        Self::Static(HeaderRecord::new())
    }
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(record) => f.debug_tuple("Static").field(record).finish(),
            Self::Sync(_) => f.write_str("Sync(<fn>)"),
            Self::Async(_) => f.write_str("Async(<fn>)"),
        }
    }
}

impl From<HeaderRecord> for HeaderSource {
    fn from(record: HeaderRecord) -> Self {
        Self::Static(record)
    }
}

impl HeaderSource {
    /// Build a static source from `(name, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Static(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), Some(value.into())))
                .collect(),
        )
    }

    /// Produce headers with a synchronous function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> HeaderRecord + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Produce headers with an asynchronous function.
    pub fn from_async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HeaderRecord> + Send + 'static,
    {
        Self::Async(Arc::new(move || Box::pin(f())))
    }

    /// Produce the header record for one attempt.
    pub async fn record(&self) -> HeaderRecord {
        match self {
            Self::Static(record) => record.clone(),
            Self::Sync(f) => f(),
            Self::Async(f) => f().await,
        }
    }

    /// Produce the header map for one attempt.
    pub async fn resolve(&self) -> HeaderMap {
        to_header_map(self.record().await)
    }
}

/// Convert a record into a [`HeaderMap`], dropping `None` entries.
///
/// Entries whose names differ only in case are appended rather than replacing
/// each other. Entries that are not valid HTTP header names or values are
/// skipped.
pub fn to_header_map(record: HeaderRecord) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(record.len());
    for (name, value) in record {
        let Some(value) = value else {
            continue;
        };
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => name,
            Err(err) => {
                warn!(header = %name, error = %err, "Skipping invalid header name");
                continue;
            }
        };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.append(name, value);
            }
            Err(err) => {
                warn!(header = %name, error = %err, "Skipping invalid header value");
            }
        }
    }
    headers
}

/// Add the `accept` and `last-event-id` defaults without overriding values the
/// caller set explicitly. Empty event ids are never sent.
pub(crate) fn apply_defaults(headers: &mut HeaderMap, last_event_id: Option<&str>) {
    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE));
    }

    if let Some(id) = last_event_id.filter(|id| !id.is_empty())
        && !headers.contains_key(&LAST_EVENT_ID)
    {
        match HeaderValue::from_str(id) {
            Ok(value) => {
                headers.insert(LAST_EVENT_ID, value);
            }
            Err(err) => warn!(error = %err, "Last event id is not a valid header value"),
        }
    }
}
