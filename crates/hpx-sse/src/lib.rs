//! # hpx-sse
//!
//! Resilient Server-Sent Events client.
//!
//! This crate issues an HTTP request (any method), parses the streaming
//! response body into SSE messages and keeps the subscription alive: it
//! reconnects with exponential backoff, resumes from the last received event
//! id, and reports exactly how a subscription ended.
//!
//! ## Features
//!
//! - **Incremental Parser**: [`parse::parse_chunk`] is pure and gives identical
//!   results however the input is split, across `\n`, `\r\n` and `\r` endings
//! - **Retry State Machine**: exponential backoff, optional retry ceiling,
//!   `always` / `on-error` strategies and a response timeout
//! - **Resumption**: the `last-event-id` header is sent on every reconnect
//! - **Lifecycle Hooks**: request, request-error, response, response-error and
//!   message hooks, replaceable per reconnect
//! - **Pluggable HTTP**: any [`Fetch`] implementation; `reqwest` by default
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hpx_sse::{AbortKind, EventSource, EventSourceOptions, SseHooks};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = EventSource::new(
//!         EventSourceOptions::new("https://example.com/events").max_retry_count(10),
//!     )?;
//!
//!     let controller = source.listen(SseHooks::new(|message| {
//!         println!("{} {}", message.event, message.data);
//!     }));
//!     controller.on_abort_event(|event| {
//!         if event.kind == AbortKind::Error {
//!             eprintln!("gave up: {:?}", event.reason);
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     controller.abort_with("shutting down");
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod headers;
pub mod hooks;
pub mod parse;
pub mod state;

// Re-export commonly used types
pub use config::{EventSourceOptions, RetryStrategy};
pub use controller::{AbortEvent, AbortKind, EventSource, MessageStream, SseController};
pub use error::{BoxError, SseError, SseResult};
#[cfg(feature = "reqwest")]
pub use fetch::ReqwestFetch;
pub use fetch::{ByteStream, Fetch, FetchRequest, FetchResponse};
pub use headers::{HeaderRecord, HeaderSource};
pub use hooks::{
    FnHook, HookOverrides, LoggingHook, MessageHook, RequestContext, RequestErrorContext,
    RequestErrorHook, RequestHook, ResponseContext, ResponseErrorContext, ResponseErrorHook,
    ResponseHook, SseHooks,
};
pub use parse::{Message, ParsedChunk, parse_chunk};
pub use state::ConnectionPhase;
