//! Lifecycle hooks for connection attempts.
//!
//! Every attempt runs the hooks in a fixed order: `on_request`, then either
//! `on_request_error` or `on_response`, followed by `on_response_error` or a
//! series of `on_message` calls. If the body fails while streaming, the
//! messages are followed by `on_request_error` with [`SseError::Stream`].
//! Hooks belonging to an attempt that has been
//! superseded (by [`reconnect`](crate::SseController::reconnect)) or aborted
//! are never invoked.
//!
//! # Example
//!
//! ```rust
//! use hpx_sse::hooks::{LoggingHook, SseHooks};
//!
//! let hooks = SseHooks::new(|message| println!("{}: {}", message.event, message.data))
//!     .on_request(|ctx| {
//!         ctx.headers
//!             .insert("x-attempt", ctx.retry_count.to_string().parse().expect("digits"));
//!     })
//!     .on_response_hook(LoggingHook::debug());
//! ```

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, header::CONTENT_TYPE};
use tracing::Level;

use crate::{error::SseError, parse::Message};

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// The request about to be sent. Hooks may edit it before it goes out.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Resolved headers, including `accept` and `last-event-id` defaults.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Bytes>,
    /// Failed attempts since the last successful connection.
    pub retry_count: u32,
}

/// A request that never produced a response.
#[derive(Debug)]
pub struct RequestErrorContext {
    /// The request as it was sent.
    pub request: RequestContext,
    /// The transport failure.
    pub error: SseError,
}

/// Response head of an attempt.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    /// The request as it was sent.
    pub request: RequestContext,
    /// Response status.
    pub status: StatusCode,
    /// Reason phrase.
    pub status_text: String,
    /// Response headers.
    pub headers: HeaderMap,
}

impl ResponseContext {
    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The `Content-Type` header, if present and readable.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// A response that cannot be streamed (bad status or content type).
#[derive(Debug)]
pub struct ResponseErrorContext {
    /// The offending response.
    pub response: ResponseContext,
    /// Why it was rejected.
    pub error: SseError,
}

// ---------------------------------------------------------------------------
// Hook traits
// ---------------------------------------------------------------------------

/// Receives every parsed message.
pub trait MessageHook: Send + Sync {
    /// Called once per message, in stream order.
    fn on_message(&self, message: Message);
}

/// Hook executed before a request is sent.
#[async_trait]
pub trait RequestHook: Send + Sync {
    /// Called before a request is sent. Can modify the request.
    async fn on_request(&self, ctx: &mut RequestContext);

    /// Get the hook name for debugging.
    fn name(&self) -> &'static str {
        "on_request"
    }
}

/// Hook executed when a request fails at the transport level, either before
/// a response arrives or while its body is being read.
#[async_trait]
pub trait RequestErrorHook: Send + Sync {
    /// Called with the failed request and its error.
    async fn on_request_error(&self, ctx: &RequestErrorContext);

    /// Get the hook name for debugging.
    fn name(&self) -> &'static str {
        "on_request_error"
    }
}

/// Hook executed when a response head arrives, whatever its status.
#[async_trait]
pub trait ResponseHook: Send + Sync {
    /// Called with the response head.
    async fn on_response(&self, ctx: &ResponseContext);

    /// Get the hook name for debugging.
    fn name(&self) -> &'static str {
        "on_response"
    }
}

/// Hook executed when a response is rejected.
#[async_trait]
pub trait ResponseErrorHook: Send + Sync {
    /// Called with the rejected response and the reason.
    async fn on_response_error(&self, ctx: &ResponseErrorContext);

    /// Get the hook name for debugging.
    fn name(&self) -> &'static str {
        "on_response_error"
    }
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// A closure-based hook for convenience.
///
/// Implements whichever hook trait matches the closure signature.
pub struct FnHook<F> {
    f: F,
    name: &'static str,
}

impl<F> FnHook<F> {
    /// Create a new function-based hook.
    pub fn new(name: &'static str, f: F) -> Self {
        Self { f, name }
    }
}

impl<F> MessageHook for FnHook<F>
where
    F: Fn(Message) + Send + Sync,
{
    fn on_message(&self, message: Message) {
        (self.f)(message);
    }
}

#[async_trait]
impl<F> RequestHook for FnHook<F>
where
    F: Fn(&mut RequestContext) + Send + Sync,
{
    async fn on_request(&self, ctx: &mut RequestContext) {
        (self.f)(ctx);
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[async_trait]
impl<F> RequestErrorHook for FnHook<F>
where
    F: Fn(&RequestErrorContext) + Send + Sync,
{
    async fn on_request_error(&self, ctx: &RequestErrorContext) {
        (self.f)(ctx);
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[async_trait]
impl<F> ResponseHook for FnHook<F>
where
    F: Fn(&ResponseContext) + Send + Sync,
{
    async fn on_response(&self, ctx: &ResponseContext) {
        (self.f)(ctx);
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[async_trait]
impl<F> ResponseErrorHook for FnHook<F>
where
    F: Fn(&ResponseErrorContext) + Send + Sync,
{
    async fn on_response_error(&self, ctx: &ResponseErrorContext) {
        (self.f)(ctx);
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

// ---------------------------------------------------------------------------
// Hook sets
// ---------------------------------------------------------------------------

/// The hooks of a subscription. Only `on_message` is required.
#[derive(Clone)]
pub struct SseHooks {
    /// Receives parsed messages.
    pub on_message: Arc<dyn MessageHook>,
    /// Runs before each request.
    pub on_request: Option<Arc<dyn RequestHook>>,
    /// Runs when a request fails or its body breaks off mid-stream.
    pub on_request_error: Option<Arc<dyn RequestErrorHook>>,
    /// Runs when a response head arrives.
    pub on_response: Option<Arc<dyn ResponseHook>>,
    /// Runs when a response is rejected.
    pub on_response_error: Option<Arc<dyn ResponseErrorHook>>,
}

impl fmt::Debug for SseHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseHooks")
            .field("on_request", &self.on_request.as_ref().map(|h| h.name()))
            .field(
                "on_request_error",
                &self.on_request_error.as_ref().map(|h| h.name()),
            )
            .field("on_response", &self.on_response.as_ref().map(|h| h.name()))
            .field(
                "on_response_error",
                &self.on_response_error.as_ref().map(|h| h.name()),
            )
            .finish_non_exhaustive()
    }
}

impl SseHooks {
    /// Create a hook set around a message closure.
    pub fn new<F>(on_message: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        Self::with_message_hook(FnHook::new("on_message", on_message))
    }

    /// Create a hook set around a [`MessageHook`] implementation.
    pub fn with_message_hook<H: MessageHook + 'static>(hook: H) -> Self {
        Self {
            on_message: Arc::new(hook),
            on_request: None,
            on_request_error: None,
            on_response: None,
            on_response_error: None,
        }
    }

    /// Set the request hook from a closure.
    #[must_use]
    pub fn on_request<F>(self, f: F) -> Self
    where
        F: Fn(&mut RequestContext) + Send + Sync + 'static,
    {
        self.on_request_hook(FnHook::new("on_request", f))
    }

    /// Set the request hook.
    #[must_use]
    pub fn on_request_hook<H: RequestHook + 'static>(mut self, hook: H) -> Self {
        self.on_request = Some(Arc::new(hook));
        self
    }

    /// Set the request-error hook from a closure.
    #[must_use]
    pub fn on_request_error<F>(self, f: F) -> Self
    where
        F: Fn(&RequestErrorContext) + Send + Sync + 'static,
    {
        self.on_request_error_hook(FnHook::new("on_request_error", f))
    }

    /// Set the request-error hook.
    #[must_use]
    pub fn on_request_error_hook<H: RequestErrorHook + 'static>(mut self, hook: H) -> Self {
        self.on_request_error = Some(Arc::new(hook));
        self
    }

    /// Set the response hook from a closure.
    #[must_use]
    pub fn on_response<F>(self, f: F) -> Self
    where
        F: Fn(&ResponseContext) + Send + Sync + 'static,
    {
        self.on_response_hook(FnHook::new("on_response", f))
    }

    /// Set the response hook.
    #[must_use]
    pub fn on_response_hook<H: ResponseHook + 'static>(mut self, hook: H) -> Self {
        self.on_response = Some(Arc::new(hook));
        self
    }

    /// Set the response-error hook from a closure.
    #[must_use]
    pub fn on_response_error<F>(self, f: F) -> Self
    where
        F: Fn(&ResponseErrorContext) + Send + Sync + 'static,
    {
        self.on_response_error_hook(FnHook::new("on_response_error", f))
    }

    /// Set the response-error hook.
    #[must_use]
    pub fn on_response_error_hook<H: ResponseErrorHook + 'static>(mut self, hook: H) -> Self {
        self.on_response_error = Some(Arc::new(hook));
        self
    }

    /// This set with every hook present in `overrides` replaced.
    #[must_use]
    pub fn merged(&self, overrides: &HookOverrides) -> Self {
        Self {
            on_message: overrides
                .on_message
                .clone()
                .unwrap_or_else(|| Arc::clone(&self.on_message)),
            on_request: overrides
                .on_request
                .clone()
                .or_else(|| self.on_request.clone()),
            on_request_error: overrides
                .on_request_error
                .clone()
                .or_else(|| self.on_request_error.clone()),
            on_response: overrides
                .on_response
                .clone()
                .or_else(|| self.on_response.clone()),
            on_response_error: overrides
                .on_response_error
                .clone()
                .or_else(|| self.on_response_error.clone()),
        }
    }

    pub(crate) fn message(&self, message: Message) {
        self.on_message.on_message(message);
    }

    pub(crate) async fn request(&self, ctx: &mut RequestContext) {
        if let Some(hook) = &self.on_request {
            tracing::trace!(hook = hook.name(), "Running on_request hook");
            hook.on_request(ctx).await;
        }
    }

    pub(crate) async fn request_error(&self, ctx: &RequestErrorContext) {
        if let Some(hook) = &self.on_request_error {
            tracing::trace!(hook = hook.name(), error = %ctx.error, "Running on_request_error hook");
            hook.on_request_error(ctx).await;
        }
    }

    pub(crate) async fn response(&self, ctx: &ResponseContext) {
        if let Some(hook) = &self.on_response {
            tracing::trace!(hook = hook.name(), status = %ctx.status, "Running on_response hook");
            hook.on_response(ctx).await;
        }
    }

    pub(crate) async fn response_error(&self, ctx: &ResponseErrorContext) {
        if let Some(hook) = &self.on_response_error {
            tracing::trace!(hook = hook.name(), error = %ctx.error, "Running on_response_error hook");
            hook.on_response_error(ctx).await;
        }
    }
}

/// Replacement hooks for [`SseController::reconnect_with`](crate::SseController::reconnect_with).
///
/// Every hook left as `None` keeps the value of the original set.
#[derive(Clone, Default)]
pub struct HookOverrides {
    /// Replacement message hook.
    pub on_message: Option<Arc<dyn MessageHook>>,
    /// Replacement request hook.
    pub on_request: Option<Arc<dyn RequestHook>>,
    /// Replacement request-error hook.
    pub on_request_error: Option<Arc<dyn RequestErrorHook>>,
    /// Replacement response hook.
    pub on_response: Option<Arc<dyn ResponseHook>>,
    /// Replacement response-error hook.
    pub on_response_error: Option<Arc<dyn ResponseErrorHook>>,
}

impl fmt::Debug for HookOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookOverrides")
            .field("on_message", &self.on_message.is_some())
            .field("on_request", &self.on_request.is_some())
            .field("on_request_error", &self.on_request_error.is_some())
            .field("on_response", &self.on_response.is_some())
            .field("on_response_error", &self.on_response_error.is_some())
            .finish()
    }
}

impl HookOverrides {
    /// Create an empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if no hook is overridden.
    pub fn is_empty(&self) -> bool {
        self.on_message.is_none()
            && self.on_request.is_none()
            && self.on_request_error.is_none()
            && self.on_response.is_none()
            && self.on_response_error.is_none()
    }

    /// Override the message hook.
    #[must_use]
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(FnHook::new("on_message", f)));
        self
    }

    /// Override the request hook.
    #[must_use]
    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext) + Send + Sync + 'static,
    {
        self.on_request = Some(Arc::new(FnHook::new("on_request", f)));
        self
    }

    /// Override the request-error hook.
    #[must_use]
    pub fn on_request_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestErrorContext) + Send + Sync + 'static,
    {
        self.on_request_error = Some(Arc::new(FnHook::new("on_request_error", f)));
        self
    }

    /// Override the response hook.
    #[must_use]
    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResponseContext) + Send + Sync + 'static,
    {
        self.on_response = Some(Arc::new(FnHook::new("on_response", f)));
        self
    }

    /// Override the response-error hook.
    #[must_use]
    pub fn on_response_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResponseErrorContext) + Send + Sync + 'static,
    {
        self.on_response_error = Some(Arc::new(FnHook::new("on_response_error", f)));
        self
    }
}

// ============================================================================
// Convenient Hook Implementations
// ============================================================================

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!($($arg)+),
            Level::WARN => tracing::warn!($($arg)+),
            Level::INFO => tracing::info!($($arg)+),
            Level::DEBUG => tracing::debug!($($arg)+),
            Level::TRACE => tracing::trace!($($arg)+),
        }
    };
}

/// A hook that logs requests, responses and failures.
///
/// Successful traffic is logged at the configured level; failures are always
/// logged at `WARN`.
#[derive(Debug, Clone, Copy)]
pub struct LoggingHook {
    level: Level,
}

impl LoggingHook {
    /// Create a new logging hook with the specified log level.
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Create a logging hook at INFO level.
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    /// Create a logging hook at DEBUG level.
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::info()
    }
}

#[async_trait]
impl RequestHook for LoggingHook {
    async fn on_request(&self, ctx: &mut RequestContext) {
        log_at!(
            self.level,
            method = %ctx.method,
            url = %ctx.url,
            retry_count = ctx.retry_count,
            headers = ?ctx.headers,
            "Sending SSE request"
        );
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

#[async_trait]
impl RequestErrorHook for LoggingHook {
    async fn on_request_error(&self, ctx: &RequestErrorContext) {
        tracing::warn!(
            method = %ctx.request.method,
            url = %ctx.request.url,
            error = %ctx.error,
            "SSE request failed"
        );
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

#[async_trait]
impl ResponseHook for LoggingHook {
    async fn on_response(&self, ctx: &ResponseContext) {
        log_at!(
            self.level,
            method = %ctx.request.method,
            url = %ctx.request.url,
            status = ctx.status.as_u16(),
            content_type = ctx.content_type().unwrap_or_default(),
            "Received SSE response"
        );
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

#[async_trait]
impl ResponseErrorHook for LoggingHook {
    async fn on_response_error(&self, ctx: &ResponseErrorContext) {
        tracing::warn!(
            method = %ctx.response.request.method,
            url = %ctx.response.request.url,
            status = ctx.response.status.as_u16(),
            error = %ctx.error,
            "SSE response rejected"
        );
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}
