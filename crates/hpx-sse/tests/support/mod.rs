//! Scripted in-memory [`Fetch`] used by the controller tests.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use hpx_sse::{
    AbortEvent, BoxError, Fetch, FetchRequest, FetchResponse, SseController,
};
use http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the fake server does for one request.
#[derive(Clone, Debug)]
pub enum Script {
    /// Fail before any response, like a refused connection.
    Error(&'static str),
    /// Never answer; only cancellation ends the request.
    Hang,
    /// Answer with a response.
    Respond(Reply),
}

/// A canned response.
#[derive(Clone, Debug)]
pub struct Reply {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub chunks: Vec<Bytes>,
    /// Keep the body open after the last chunk.
    pub hang: bool,
    /// Break the body off with this error after the last chunk.
    pub fail: Option<&'static str>,
}

impl Reply {
    /// A 200 `text/event-stream` response that closes after `chunks`.
    pub fn events(chunks: &[&'static str]) -> Self {
        Self {
            status: 200,
            content_type: Some("text/event-stream"),
            chunks: chunks.iter().map(|c| Bytes::from_static(c.as_bytes())).collect(),
            hang: false,
            fail: None,
        }
    }

    /// Same body from raw byte chunks.
    pub fn bytes(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Bytes::from).collect(),
            ..Self::events(&[])
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn content_type(mut self, content_type: Option<&'static str>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn fail(mut self, error: &'static str) -> Self {
        self.fail = Some(error);
        self
    }
}

/// Replays `scripts` in order, then `fallback` forever. Records every request.
pub struct ScriptedFetch {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    requests: Arc<Mutex<Vec<FetchRequest>>>,
}

impl ScriptedFetch {
    pub fn new(scripts: Vec<Script>, fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the recorded requests that stays valid after the fetcher is
    /// moved into the options.
    pub fn requests(&self) -> Requests {
        Requests(Arc::clone(&self.requests))
    }
}

#[async_trait]
impl Fetch for ScriptedFetch {
    async fn fetch(
        &self,
        request: FetchRequest,
        signal: CancellationToken,
    ) -> Result<FetchResponse, BoxError> {
        self.requests.lock().expect("lock").push(request);
        let script = self
            .scripts
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match script {
            Script::Error(message) => Err(message.into()),
            Script::Hang => {
                signal.cancelled().await;
                Err("request cancelled".into())
            }
            Script::Respond(reply) => {
                let mut headers = HeaderMap::new();
                if let Some(content_type) = reply.content_type {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                let chunks = stream::iter(reply.chunks.into_iter().map(Ok::<_, BoxError>));
                let body = match (reply.fail, reply.hang) {
                    (Some(error), _) => chunks
                        .chain(stream::once(async move { Err::<Bytes, BoxError>(error.into()) }))
                        .boxed(),
                    (None, true) => chunks.chain(stream::pending()).boxed(),
                    (None, false) => chunks.boxed(),
                };
                let status = StatusCode::from_u16(reply.status).expect("valid status");
                Ok(FetchResponse::new(status, headers, body))
            }
        }
    }
}

#[derive(Clone)]
pub struct Requests(Arc<Mutex<Vec<FetchRequest>>>);

impl Requests {
    pub fn len(&self) -> usize {
        self.0.lock().expect("lock").len()
    }

    pub fn get(&self, index: usize) -> FetchRequest {
        self.0.lock().expect("lock")[index].clone()
    }

    /// Header value of request `index`.
    pub fn header(&self, index: usize, name: &str) -> Option<String> {
        self.get(index)
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Wait until at least `count` requests were made.
    pub async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} requests, saw {}", self.len()));
    }
}

/// Forward every abort event of `controller` into a channel.
pub fn abort_events(controller: &SseController) -> mpsc::UnboundedReceiver<AbortEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    controller.on_abort_event(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Receive the next item or fail after a generous timeout.
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for item")
        .expect("channel closed")
}

/// Assert nothing arrives within `window`.
pub async fn assert_quiet<T: std::fmt::Debug>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    window: Duration,
) {
    if let Ok(Some(item)) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected item: {item:?}");
    }
}
