//! SSE Listen Example
//!
//! Subscribes to an event stream, prints every message and stops on Ctrl-C.
//!
//! Run with: `cargo run -p hpx-sse --example listen -- https://sse.dev/test`
//!
//! Set `RUST_LOG=hpx_sse=debug` to watch connection attempts and backoff.

use std::time::Duration;

use futures_util::StreamExt;
use hpx_sse::{EventSource, EventSourceOptions, LoggingHook, SseHooks};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://sse.dev/test".to_string());

    let source = EventSource::new(
        EventSourceOptions::new(url)
            .header("user-agent", "hpx-sse-example")
            .max_retry_interval(Duration::from_secs(10))
            .timeout(Duration::from_secs(15)),
    )?;

    // Hook-style subscription with request/response logging.
    let controller = source.listen(
        SseHooks::new(|message| {
            println!(
                "[hook] event={} id={:?} data={}",
                message.event, message.id, message.data
            );
        })
        .on_request_hook(LoggingHook::info())
        .on_request_error_hook(LoggingHook::info())
        .on_response_hook(LoggingHook::info())
        .on_response_error_hook(LoggingHook::info()),
    );
    controller.on_abort_event(|event| {
        println!("[hook] subscription ended: {:?} {:?}", event.kind, event.reason);
    });

    // Stream-style subscription of the same endpoint.
    let (stream_controller, mut stream) = source.listen_stream();
    let printer = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            println!("[stream] {}: {}", message.event, message.data);
        }
    });

    tokio::signal::ctrl_c().await?;
    controller.abort_with("interrupted");
    stream_controller.abort_with("interrupted");
    printer.await?;
    Ok(())
}
