//! Subscription driver.
//!
//! Provides [`EventSource`], [`SseController`] and [`MessageStream`]. A
//! subscription runs as one background task per attempt lineage: it resolves
//! headers, sends the request, validates the response, streams and parses the
//! body, and reconnects with exponential backoff until it is aborted or gives
//! up.

use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, mpsc},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(feature = "reqwest")]
use crate::fetch::ReqwestFetch;
use crate::{
    config::{EventSourceOptions, RetryStrategy},
    error::{SseError, SseResult},
    fetch::{ByteStream, Fetch, FetchRequest, FetchResponse},
    headers::{EVENT_STREAM_CONTENT_TYPE, apply_defaults},
    hooks::{
        HookOverrides, MessageHook, RequestContext, RequestErrorContext, ResponseContext,
        ResponseErrorContext, SseHooks,
    },
    parse::{Message, Utf8Decoder, parse_chunk},
    state::{ConnectionPhase, ConnectionState, RetryDecision},
};

const MAX_RETRY_REASON: &str = "max retry count reached";
const END_OF_STREAM_REASON: &str = "Stream has ended";

// ---------------------------------------------------------------------------
// Abort events
// ---------------------------------------------------------------------------

/// Why a subscription stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortKind {
    /// [`SseController::abort`] was called.
    Manual,
    /// The server closed the stream under [`RetryStrategy::OnError`].
    EndOfStream,
    /// Terminal failure: retries exhausted or timeout.
    Error,
}

/// Emitted once when a subscription stops.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortEvent {
    /// What ended the subscription.
    #[serde(rename = "type")]
    pub kind: AbortKind,
    /// Optional human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AbortEvent {
    /// Create an event of the given kind.
    pub fn new(kind: AbortKind, reason: Option<String>) -> Self {
        Self { kind, reason }
    }

    fn manual(reason: Option<String>) -> Self {
        Self::new(AbortKind::Manual, reason)
    }

    fn end_of_stream() -> Self {
        Self::new(AbortKind::EndOfStream, Some(END_OF_STREAM_REASON.to_string()))
    }

    fn error(reason: impl Into<String>) -> Self {
        Self::new(AbortKind::Error, Some(reason.into()))
    }
}

type AbortListener = Arc<dyn Fn(&AbortEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// Public API: EventSource
// ---------------------------------------------------------------------------

/// A configured SSE endpoint.
///
/// Every call to [`listen()`](EventSource::listen) starts an independent
/// subscription with its own retry counters and last event id.
#[derive(Clone)]
pub struct EventSource {
    options: Arc<EventSourceOptions>,
    fetch: Arc<dyn Fetch>,
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl EventSource {
    /// Create an event source from validated options.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::Config`] if the options are invalid.
    pub fn new(options: EventSourceOptions) -> SseResult<Self> {
        options.validate().map_err(SseError::config)?;
        let fetch: Arc<dyn Fetch> = match &options.fetch {
            Some(fetch) => Arc::clone(fetch),
            #[cfg(feature = "reqwest")]
            None => Arc::new(ReqwestFetch::new()),
            #[cfg(not(feature = "reqwest"))]
            None => return Err(SseError::config("No fetch implementation configured")),
        };

        Ok(Self {
            options: Arc::new(options),
            fetch,
        })
    }

    /// Shorthand for `EventSource::new(EventSourceOptions::new(url))`.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::Config`] if the URL is invalid.
    pub fn from_url(url: impl Into<String>) -> SseResult<Self> {
        Self::new(EventSourceOptions::new(url))
    }

    /// The options this source was built with.
    pub fn options(&self) -> &EventSourceOptions {
        &self.options
    }

    /// Start a subscription. The first attempt begins immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn listen(&self, hooks: SseHooks) -> SseController {
        self.spawn(hooks, Vec::new())
    }

    /// Start a subscription whose messages are delivered as a [`Stream`].
    ///
    /// The stream ends once the subscription emits an abort event.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn listen_stream(&self) -> (SseController, MessageStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = Arc::new(Mutex::new(Some(tx)));
        let close = Arc::clone(&sender);
        let listener: AbortListener = Arc::new(move |_: &AbortEvent| {
            close.lock().take();
        });

        let controller = self.spawn(
            SseHooks::with_message_hook(ChannelHook { sender }),
            vec![listener],
        );
        (controller, MessageStream { rx })
    }

    fn spawn(&self, hooks: SseHooks, listeners: Vec<AbortListener>) -> SseController {
        let signal = CancellationToken::new();
        let shared = Arc::new(Shared {
            options: Arc::clone(&self.options),
            fetch: Arc::clone(&self.fetch),
            state: Mutex::new(ConnectionState::default()),
            control: Mutex::new(ControlState {
                epoch: 0,
                signal: signal.clone(),
                did_abort: false,
                last_event: None,
                listeners,
            }),
            dispatch: AsyncMutex::new(()),
        });

        let controller = SseController {
            shared,
            base_hooks: hooks.clone(),
        };
        controller.start(hooks, 0, signal);
        controller
    }
}

// ---------------------------------------------------------------------------
// Shared subscription state
// ---------------------------------------------------------------------------

struct ControlState {
    /// Bumped by every reconnect; identifies the live attempt lineage.
    epoch: u64,
    /// Cancellation signal of the current attempt.
    signal: CancellationToken,
    did_abort: bool,
    last_event: Option<AbortEvent>,
    listeners: Vec<AbortListener>,
}

struct Shared {
    options: Arc<EventSourceOptions>,
    fetch: Arc<dyn Fetch>,
    state: Mutex<ConnectionState>,
    control: Mutex<ControlState>,
    /// Serialises hook dispatch so a superseded lineage cannot interleave
    /// with the one replacing it.
    dispatch: AsyncMutex<()>,
}

impl Shared {
    /// Latch the abort flag and notify listeners.
    ///
    /// `epoch` is `Some` for events raised by a driver; those are dropped if
    /// the driver has been superseded.
    fn emit(&self, event: AbortEvent, epoch: Option<u64>) -> bool {
        let listeners = {
            let mut control = self.control.lock();
            if control.did_abort {
                return false;
            }
            if let Some(epoch) = epoch
                && epoch != control.epoch
            {
                return false;
            }
            control.did_abort = true;
            control.signal.cancel();
            control.last_event = Some(event.clone());
            control.listeners.clone()
        };

        self.state.lock().phase = ConnectionPhase::Closed;
        info!(
            url = %self.options.url,
            kind = ?event.kind,
            reason = event.reason.as_deref().unwrap_or_default(),
            "SSE subscription aborted"
        );
        for listener in listeners {
            listener(&event);
        }
        true
    }

    /// Replace the signal of lineage `epoch` before its next attempt.
    fn renew_signal(&self, epoch: u64) -> Option<CancellationToken> {
        let mut control = self.control.lock();
        if control.epoch != epoch || control.did_abort || control.signal.is_cancelled() {
            return None;
        }
        control.signal.cancel();
        control.signal = CancellationToken::new();
        Some(control.signal.clone())
    }

    /// Wait for the dispatch lock unless `token` is cancelled first.
    async fn lock_dispatch(&self, token: &CancellationToken) -> Option<AsyncMutexGuard<'_, ()>> {
        let guard = tokio::select! {
            biased;

            _ = token.cancelled() => return None,
            guard = self.dispatch.lock() => guard,
        };
        (!token.is_cancelled()).then_some(guard)
    }

    fn set_phase(&self, token: &CancellationToken, phase: ConnectionPhase) {
        let mut state = self.state.lock();
        if !token.is_cancelled() {
            state.phase = phase;
        }
    }
}

// ---------------------------------------------------------------------------
// SseController
// ---------------------------------------------------------------------------

/// Clone-able handle for controlling a running subscription.
///
/// Dropping every handle does not stop the subscription; call
/// [`abort()`](SseController::abort).
#[derive(Clone)]
pub struct SseController {
    shared: Arc<Shared>,
    base_hooks: SseHooks,
}

impl fmt::Debug for SseController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseController")
            .field("url", &self.shared.options.url)
            .field("did_abort", &self.did_abort())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SseController {
    /// Stop the subscription without a reason.
    ///
    /// Only the first abort of a latch cycle has any effect.
    pub fn abort(&self) {
        self.abort_inner(None);
    }

    /// Stop the subscription with a reason.
    pub fn abort_with(&self, reason: impl Into<String>) {
        self.abort_inner(Some(reason.into()));
    }

    fn abort_inner(&self, reason: Option<String>) {
        if self.shared.emit(AbortEvent::manual(reason), None) {
            debug!(url = %self.shared.options.url, "SSE subscription aborted manually");
        }
    }

    /// Cancel the current attempt and start a fresh one with the original hooks.
    ///
    /// Clears the abort latch, so this also revives an aborted subscription.
    pub fn reconnect(&self) {
        self.reconnect_with(HookOverrides::default());
    }

    /// Cancel the current attempt and start a fresh one, replacing the hooks
    /// present in `overrides` until the next reconnect.
    pub fn reconnect_with(&self, overrides: HookOverrides) {
        let (epoch, signal) = {
            let mut control = self.shared.control.lock();
            control.signal.cancel();
            control.epoch = control.epoch.wrapping_add(1);
            control.signal = CancellationToken::new();
            control.did_abort = false;
            control.last_event = None;
            (control.epoch, control.signal.clone())
        };
        info!(url = %self.shared.options.url, epoch, "SSE reconnect requested");
        self.start(self.base_hooks.merged(&overrides), epoch, signal);
    }

    /// Register a listener for the abort event.
    ///
    /// A listener registered after the subscription already stopped is called
    /// immediately with the event that stopped it.
    pub fn on_abort_event<F>(&self, f: F)
    where
        F: Fn(&AbortEvent) + Send + Sync + 'static,
    {
        let listener: AbortListener = Arc::new(f);
        let replay = {
            let mut control = self.shared.control.lock();
            control.listeners.push(Arc::clone(&listener));
            control.last_event.clone()
        };
        if let Some(event) = replay {
            listener(&event);
        }
    }

    /// Cancellation signal of the current attempt.
    ///
    /// A new signal is created for every attempt; the returned token is
    /// cancelled when its attempt ends.
    pub fn signal(&self) -> CancellationToken {
        self.shared.control.lock().signal.clone()
    }

    /// Whether an abort event was emitted since the last reconnect.
    pub fn did_abort(&self) -> bool {
        self.shared.control.lock().did_abort
    }

    /// Id sent as `last-event-id` on the next attempt.
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.state.lock().last_event_id.clone()
    }

    /// Failed attempts since the last successful connection.
    pub fn retry_count(&self) -> u32 {
        self.shared.state.lock().retry_count
    }

    /// Most recent backoff delay; zero after a successful connection.
    pub fn retry_interval(&self) -> Duration {
        self.shared.state.lock().retry_interval
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.shared.state.lock().phase.clone()
    }

    fn start(&self, hooks: SseHooks, epoch: u64, signal: CancellationToken) {
        let driver = Driver {
            shared: Arc::clone(&self.shared),
            hooks,
            epoch,
        };
        tokio::spawn(driver.run(signal));
    }
}

// ---------------------------------------------------------------------------
// MessageStream
// ---------------------------------------------------------------------------

struct ChannelHook {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
}

impl MessageHook for ChannelHook {
    fn on_message(&self, message: Message) {
        if let Some(sender) = self.sender.lock().as_ref() {
            // Receiver gone: the consumer no longer cares.
            let _ = sender.send(message);
        }
    }
}

/// Stream of [`Message`]s from [`EventSource::listen_stream`].
///
/// Implements [`Stream`] for use with `StreamExt` combinators.
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}

impl MessageStream {
    /// Receive the next message, waiting until one is available.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Stream for MessageStream {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}

// ---------------------------------------------------------------------------
// Internal: background driver
// ---------------------------------------------------------------------------

/// How a single attempt ended.
#[derive(Debug)]
enum Outcome {
    /// Aborted or superseded; stop without side effects.
    Cancelled,
    /// The server closed the stream cleanly.
    Ended,
    /// A recoverable failure, already reported to the hooks.
    Failed,
}

/// One attempt lineage: the chain of attempts between two reconnects.
struct Driver {
    shared: Arc<Shared>,
    hooks: SseHooks,
    epoch: u64,
}

impl Driver {
    async fn run(self, mut signal: CancellationToken) {
        let options = Arc::clone(&self.shared.options);
        loop {
            let outcome = self.attempt(&signal).await;
            debug!(url = %options.url, epoch = self.epoch, ?outcome, "SSE attempt finished");

            match outcome {
                Outcome::Cancelled => return,
                Outcome::Ended if options.retry_strategy == RetryStrategy::OnError => {
                    self.shared.emit(AbortEvent::end_of_stream(), Some(self.epoch));
                    return;
                }
                Outcome::Ended | Outcome::Failed => {}
            }

            let decision = {
                let mut state = self.shared.state.lock();
                if signal.is_cancelled() {
                    return;
                }
                state.next_retry(options.max_retry_count, options.backoff())
            };
            let delay = match decision {
                RetryDecision::GiveUp { count } => {
                    let error = SseError::MaxRetries { count };
                    warn!(url = %options.url, error = %error, "Giving up on SSE subscription");
                    self.shared
                        .emit(AbortEvent::error(MAX_RETRY_REASON), Some(self.epoch));
                    return;
                }
                RetryDecision::Wait(delay) => delay,
            };

            warn!(
                url = %options.url,
                attempt = self.shared.state.lock().retry_count,
                delay_ms = delay.as_millis() as u64,
                "SSE reconnecting after backoff"
            );
            tokio::select! {
                biased;

                _ = signal.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.shared.renew_signal(self.epoch) {
                Some(next) => signal = next,
                None => return,
            }
        }
    }

    async fn attempt(&self, signal: &CancellationToken) -> Outcome {
        let shared = &self.shared;
        let options = &shared.options;
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        shared.set_phase(signal, ConnectionPhase::Connecting);

        let mut headers = tokio::select! {
            biased;

            _ = signal.cancelled() => return Outcome::Cancelled,
            _ = expire(deadline) => {
                self.time_out(&options.url);
                return Outcome::Cancelled;
            }
            headers = options.headers.resolve() => headers,
        };
        let (last_event_id, retry_count) = {
            let state = shared.state.lock();
            (state.last_event_id.clone(), state.retry_count)
        };
        apply_defaults(&mut headers, last_event_id.as_deref());

        let mut request = RequestContext {
            url: options.url.clone(),
            method: options.method.clone(),
            headers,
            body: options.body.clone(),
            retry_count,
        };
        {
            let Some(_guard) = shared.lock_dispatch(signal).await else {
                return Outcome::Cancelled;
            };
            self.hooks.request(&mut request).await;
        }

        info!(
            url = %request.url,
            method = %request.method,
            attempt = retry_count + 1,
            epoch = self.epoch,
            "SSE connecting"
        );
        let response = match self.send(&request, deadline, signal).await {
            Some(response) => response,
            None => return Outcome::Cancelled,
        };

        let FetchResponse {
            status,
            status_text,
            headers,
            body,
        } = match response {
            Ok(response) => response,
            Err(error) => {
                if signal.is_cancelled() {
                    return Outcome::Cancelled;
                }
                warn!(url = %request.url, error = %error, "SSE request failed");
                let ctx = RequestErrorContext { request, error };
                let Some(_guard) = shared.lock_dispatch(signal).await else {
                    return Outcome::Cancelled;
                };
                self.hooks.request_error(&ctx).await;
                return Outcome::Failed;
            }
        };

        let response = ResponseContext {
            request,
            status,
            status_text,
            headers,
        };
        {
            let Some(_guard) = shared.lock_dispatch(signal).await else {
                return Outcome::Cancelled;
            };
            self.hooks.response(&response).await;
            if signal.is_cancelled() {
                return Outcome::Cancelled;
            }

            let rejection = if !response.is_success() {
                Some(SseError::status(response.status, response.status_text.clone()))
            } else {
                match response.content_type() {
                    Some(ct) if ct.contains(EVENT_STREAM_CONTENT_TYPE) => None,
                    other => Some(SseError::content_type(other)),
                }
            };
            if let Some(error) = rejection {
                warn!(
                    url = %response.request.url,
                    status = response.status.as_u16(),
                    error = %error,
                    "SSE response rejected"
                );
                let ctx = ResponseErrorContext { response, error };
                self.hooks.response_error(&ctx).await;
                return Outcome::Failed;
            }
        }

        {
            let mut state = shared.state.lock();
            if signal.is_cancelled() {
                return Outcome::Cancelled;
            }
            state.reset_retry();
            state.phase = ConnectionPhase::Streaming;
        }
        info!(url = %response.request.url, status = response.status.as_u16(), "SSE connection established");

        self.stream(body, &response.request, signal).await
    }

    /// Send the request, racing it against cancellation and the attempt
    /// deadline.
    ///
    /// Returns `None` when the attempt was cancelled or timed out.
    async fn send(
        &self,
        request: &RequestContext,
        deadline: Option<Instant>,
        signal: &CancellationToken,
    ) -> Option<Result<FetchResponse, SseError>> {
        let fetch_request = FetchRequest {
            url: request.url.clone(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        };

        tokio::select! {
            biased;

            _ = signal.cancelled() => None,
            _ = expire(deadline) => {
                self.time_out(&request.url);
                None
            }
            result = self.shared.fetch.fetch(fetch_request, signal.clone()) => {
                Some(result.map_err(SseError::Request))
            }
        }
    }

    /// End the subscription because no response arrived in time.
    fn time_out(&self, url: &str) {
        let duration = self.shared.options.timeout.unwrap_or_default();
        warn!(url = %url, timeout_ms = duration.as_millis() as u64, "SSE request timed out");
        self.shared.emit(
            AbortEvent::error(SseError::timeout(duration).to_string()),
            Some(self.epoch),
        );
    }

    async fn stream(
        &self,
        mut body: ByteStream,
        request: &RequestContext,
        signal: &CancellationToken,
    ) -> Outcome {
        let mut decoder = Utf8Decoder::new();
        let mut leftover = String::new();

        loop {
            let chunk = tokio::select! {
                biased;

                _ = signal.cancelled() => return Outcome::Cancelled,
                chunk = body.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(err)) => {
                    if signal.is_cancelled() {
                        return Outcome::Cancelled;
                    }
                    let error = SseError::stream(err);
                    warn!(url = %request.url, error = %error, "SSE stream error");
                    let ctx = RequestErrorContext {
                        request: request.clone(),
                        error,
                    };
                    let Some(_guard) = self.shared.lock_dispatch(signal).await else {
                        return Outcome::Cancelled;
                    };
                    self.hooks.request_error(&ctx).await;
                    return Outcome::Failed;
                }
                None => {
                    if signal.is_cancelled() {
                        return Outcome::Cancelled;
                    }
                    debug!(
                        url = %self.shared.options.url,
                        unterminated = leftover.len() + decoder.finish().len(),
                        "SSE stream ended"
                    );
                    return Outcome::Ended;
                }
            };

            let text = decoder.decode(&bytes);
            let parsed = parse_chunk(&leftover, &text);
            leftover = parsed.leftover;
            if parsed.messages.is_empty() {
                continue;
            }

            let Some(_guard) = self.shared.lock_dispatch(signal).await else {
                return Outcome::Cancelled;
            };
            for message in parsed.messages {
                {
                    let mut state = self.shared.state.lock();
                    if signal.is_cancelled() {
                        return Outcome::Cancelled;
                    }
                    state.record_event_id(message.id.as_deref());
                }
                self.hooks.message(message);
            }
        }
    }
}

/// Resolves once `deadline` passes; never resolves without one.
async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_event_serde_names() {
        let event = AbortEvent::end_of_stream();
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(json, r#"{"type":"end-of-stream","reason":"Stream has ended"}"#);

        let manual: AbortEvent = serde_json::from_str(r#"{"type":"manual"}"#).expect("parse");
        assert_eq!(manual, AbortEvent::manual(None));
    }

    #[test]
    fn test_error_event_reason() {
        let event = AbortEvent::error(SseError::timeout(Duration::from_millis(1500)).to_string());
        assert_eq!(event.kind, AbortKind::Error);
        assert_eq!(event.reason.as_deref(), Some("Timeout of 1500ms exceeded"));
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let err = EventSource::from_url("").expect_err("empty url");
        assert!(matches!(err, SseError::Config { .. }));
    }
}
