//! Per-subscription connection bookkeeping.

use std::time::Duration;

use crate::backoff::{BackoffConfig, calculate_backoff};

/// Where a subscription currently is in its lifecycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Created, no attempt started yet.
    #[default]
    Idle,
    /// Resolving headers or waiting for a response.
    Connecting,
    /// Reading the event stream.
    Streaming,
    /// Waiting out the backoff delay.
    Retrying {
        /// Consecutive failed attempts so far.
        attempt: u32,
    },
    /// An abort event was emitted. Nothing runs until a reconnect.
    Closed,
}

impl ConnectionPhase {
    /// Returns `true` if the connection is actively streaming.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Returns `true` if the subscription is in a terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Outcome of a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Sleep for the delay, then connect again.
    Wait(Duration),
    /// The retry budget is spent.
    GiveUp { count: u32 },
}

/// Mutable state shared by every attempt of one subscription.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConnectionState {
    /// Id of the last message that carried a non-empty id.
    pub(crate) last_event_id: Option<String>,
    /// Failed attempts since the last successful connection.
    pub(crate) retry_count: u32,
    /// Most recent backoff delay; zero after a success.
    pub(crate) retry_interval: Duration,
    pub(crate) phase: ConnectionPhase,
}

impl ConnectionState {
    /// Remember `id` for resumption. Empty ids never replace a known one.
    pub(crate) fn record_event_id(&mut self, id: Option<&str>) {
        if let Some(id) = id
            && !id.is_empty()
        {
            self.last_event_id = Some(id.to_owned());
        }
    }

    /// Forget past failures after a successful connection.
    pub(crate) fn reset_retry(&mut self) {
        self.retry_count = 0;
        self.retry_interval = Duration::ZERO;
    }

    /// Count one failure and decide whether and when to try again.
    pub(crate) fn next_retry(
        &mut self,
        max_retry_count: Option<u32>,
        backoff: BackoffConfig,
    ) -> RetryDecision {
        self.retry_count = self.retry_count.saturating_add(1);
        if let Some(max) = max_retry_count
            && self.retry_count >= max
        {
            return RetryDecision::GiveUp {
                count: self.retry_count,
            };
        }

        self.retry_interval = calculate_backoff(backoff, self.retry_count - 1);
        self.phase = ConnectionPhase::Retrying {
            attempt: self.retry_count,
        };
        RetryDecision::Wait(self.retry_interval)
    }
}
