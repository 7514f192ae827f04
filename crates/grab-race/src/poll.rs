//! # Poll Primitive
//!
//! Cooperative poll-with-timeout returning a tagged result.
//!
//! ```text
//!   poll #1 ──► Pending ──sleep(interval)──► poll #2 ──► ... ──► poll #N
//!      │                                        │                  │
//!      └── Ready(T) ──► PollOutcome::Ready      │                  └── NotReady
//!                                               └── rejected ──► Failed
//! ```
//!
//! Each call is bounded by `call_timeout`. Transport failures use up one
//! poll from the budget; a rejection by the service ends polling at once.

use std::future::Future;
use std::time::Duration;

use tracing::trace;

use grab_core::clip_reason;

use crate::error::{RaceError, RaceResult};

/// Bounded retry budget for one poll stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_polls: u32,
    pub interval: Duration,
    pub call_timeout: Duration,
}

impl PollPolicy {
    /// Single poll, no waiting.
    pub fn once(call_timeout: Duration) -> Self {
        PollPolicy {
            max_polls: 1,
            interval: Duration::ZERO,
            call_timeout,
        }
    }

    /// Upper bound on the time one poll stage can take.
    pub fn worst_case(&self) -> Duration {
        let polls = self.max_polls.max(1);
        self.call_timeout * polls + self.interval * (polls - 1)
    }
}

/// What one poll call saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply<T> {
    Pending,
    Ready(T),
}

/// What a whole poll stage produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    NotReady,
    Failed(String),
}

/// Runs `fut` with a deadline, mapping expiry to [`RaceError::Timeout`].
pub async fn call_with_timeout<T, F>(limit: Duration, fut: F) -> RaceResult<T>
where
    F: Future<Output = RaceResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RaceError::Timeout(limit.as_millis() as u64)),
    }
}

/// Polls until a terminal reply, a rejection, or the budget runs out.
pub async fn poll_until_ready<T, F, Fut>(policy: &PollPolicy, mut poll: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RaceResult<PollReply<T>>>,
{
    let polls = policy.max_polls.max(1);
    let mut last_error: Option<String> = None;

    for round in 1..=polls {
        match call_with_timeout(policy.call_timeout, poll()).await {
            Ok(PollReply::Ready(value)) => return PollOutcome::Ready(value),
            Ok(PollReply::Pending) => {
                trace!(round, "Poll pending");
                last_error = None;
            }
            Err(e) if e.is_retryable() => {
                trace!(round, error = %e, "Poll failed, retrying");
                last_error = Some(e.to_string());
            }
            Err(e) => return PollOutcome::Failed(clip_reason(&e.to_string())),
        }

        if round < polls {
            tokio::time::sleep(policy.interval).await;
        }
    }

    match last_error {
        Some(e) => PollOutcome::Failed(clip_reason(&e)),
        None => PollOutcome::NotReady,
    }
}
