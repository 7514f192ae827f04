//! # Domain Types
//!
//! Core domain types shared by the race engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Target       │   │   RaceWindow    │   │    Attempt      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  slot (SlotId)  │   │  start          │   │  seq            │       │
//! │  │  label          │   │  deadline       │   │  slot           │       │
//! │  │  rank           │   │  concurrency    │   │  intent_id?     │       │
//! │  └─────────────────┘   └─────────────────┘   │  confirm_id?    │       │
//! │                                              └─────────────────┘       │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ClockOffset    │   │    Outcome      │   │     Stage       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  trusted - local│   │  Success        │   │  SubmitIntent   │       │
//! │  │  (signed)       │   │  AlreadyHeld    │   │  PollIntent     │       │
//! │  └─────────────────┘   │  Conflict       │   │  Confirm        │       │
//! │                        │  Transient(..)  │   │  PollConfirm    │       │
//! │                        │  Unknown(..)    │   └─────────────────┘       │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//! - `ClockOffset` is computed once near race start and reused for that race.
//! - `Target`s are built once from configuration and never mutated.
//! - `Attempt`s are owned by one worker and dropped on completion.
//! - `RaceWindow` is fixed for the duration of one target's race.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::MAX_REASON_CHARS;

// =============================================================================
// Slot Identifier
// =============================================================================

/// Opaque identifier of one enrollment slot (the service's lesson id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub i64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Target
// =============================================================================

/// One enrollment slot to pursue.
///
/// Lower `rank` is tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Slot to acquire.
    pub slot: SlotId,

    /// Human-readable label (course name, schedule).
    pub label: String,

    /// Priority rank, ascending.
    pub rank: u32,
}

impl Target {
    pub fn new(slot: SlotId, label: impl Into<String>, rank: u32) -> Self {
        Target {
            slot,
            label: label.into(),
            rank,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (slot {}, rank {})", self.label, self.slot, self.rank)
    }
}

/// Sorts targets by ascending rank, keeping configuration order for ties.
pub fn sort_by_rank(targets: &mut [Target]) {
    targets.sort_by_key(|t| t.rank);
}

// =============================================================================
// Clock Offset
// =============================================================================

/// Signed difference `trusted time - local time`.
///
/// A positive offset means the local clock is behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockOffset(TimeDelta);

impl ClockOffset {
    /// Zero offset: trust the local clock.
    pub const fn zero() -> Self {
        ClockOffset(TimeDelta::zero())
    }

    pub fn from_delta(delta: TimeDelta) -> Self {
        ClockOffset(delta)
    }

    pub fn from_millis(millis: i64) -> Self {
        ClockOffset(TimeDelta::milliseconds(millis))
    }

    /// Arithmetic mean of the samples, or `None` when there are none.
    ///
    /// Averaging is done in whole microseconds.
    pub fn mean(samples: &[TimeDelta]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let total: i128 = samples
            .iter()
            .map(|s| i128::from(s.num_microseconds().unwrap_or(0)))
            .sum();
        let mean = total / samples.len() as i128;
        Some(ClockOffset(TimeDelta::microseconds(mean as i64)))
    }

    /// Returns the underlying signed delta.
    pub fn delta(&self) -> TimeDelta {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Corrected wall-clock time: `local + offset`.
    pub fn corrected(&self, local: DateTime<Utc>) -> DateTime<Utc> {
        local + self.0
    }

    /// Corrected "now".
    pub fn now(&self) -> DateTime<Utc> {
        self.corrected(Utc::now())
    }
}

impl Default for ClockOffset {
    fn default() -> Self {
        ClockOffset::zero()
    }
}

impl fmt::Display for ClockOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.num_milliseconds();
        let sign = if millis < 0 { '-' } else { '+' };
        let abs = millis.unsigned_abs();
        write!(f, "{}{}.{:03}s", sign, abs / 1000, abs % 1000)
    }
}

// =============================================================================
// Race Policy & Window
// =============================================================================

/// Fixed timing parameters applied to every target's race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RacePolicy {
    /// How long before the target time attempts may start.
    pub lead_in: TimeDelta,

    /// How long after `max(target, now)` attempts keep launching.
    pub overrun: TimeDelta,

    /// Maximum in-flight attempts.
    pub concurrency: usize,
}

impl RacePolicy {
    /// Builds a policy from std durations.
    pub fn new(
        lead_in: std::time::Duration,
        overrun: std::time::Duration,
        concurrency: usize,
    ) -> CoreResult<Self> {
        if concurrency == 0 {
            return Err(CoreError::InvalidConcurrency(concurrency));
        }
        let lead_in = TimeDelta::from_std(lead_in)
            .map_err(|e| CoreError::InvalidPolicy(format!("lead-in: {}", e)))?;
        let overrun = TimeDelta::from_std(overrun)
            .map_err(|e| CoreError::InvalidPolicy(format!("overrun: {}", e)))?;
        Ok(RacePolicy {
            lead_in,
            overrun,
            concurrency,
        })
    }
}

impl Default for RacePolicy {
    fn default() -> Self {
        RacePolicy {
            lead_in: TimeDelta::seconds(5),
            overrun: TimeDelta::seconds(180),
            concurrency: 4,
        }
    }
}

/// Start, deadline and concurrency of one target's race.
///
/// Invariant: `start <= deadline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceWindow {
    pub start: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub concurrency: usize,
}

impl RaceWindow {
    /// Derives the window for a race anchored at `target_time`.
    ///
    /// ```text
    /// start    = max(now, target - lead_in)
    /// deadline = max(target, now) + overrun
    /// ```
    pub fn derive(target_time: DateTime<Utc>, now: DateTime<Utc>, policy: &RacePolicy) -> Self {
        let start = now.max(target_time - policy.lead_in);
        let deadline = target_time.max(now) + policy.overrun;
        RaceWindow {
            start,
            deadline: deadline.max(start),
            concurrency: policy.concurrency.max(1),
        }
    }

    /// Time left until `start`, zero when already past.
    pub fn until_start(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.start - now).to_std().unwrap_or_default()
    }

    /// Time left until `deadline`, zero when already past.
    pub fn until_deadline(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.deadline - now).to_std().unwrap_or_default()
    }

    /// Returns true once `now` has reached the deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

// =============================================================================
// Attempt
// =============================================================================

/// Stages of one acquisition attempt, strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SubmitIntent,
    PollIntentResult,
    Confirm,
    PollConfirmResult,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::SubmitIntent => write!(f, "submit-intent"),
            Stage::PollIntentResult => write!(f, "poll-intent"),
            Stage::Confirm => write!(f, "confirm"),
            Stage::PollConfirmResult => write!(f, "poll-confirm"),
        }
    }
}

/// One pass through the acquisition workflow.
///
/// Owned exclusively by the worker executing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Sequence number within the race, starting at 1.
    pub seq: u64,

    pub slot: SlotId,

    /// Identifier returned by the intent submission.
    pub intent_id: Option<String>,

    /// Identifier returned by the confirm submission.
    pub confirm_id: Option<String>,
}

impl Attempt {
    pub fn new(seq: u64, slot: SlotId) -> Self {
        Attempt {
            seq,
            slot,
            intent_id: None,
            confirm_id: None,
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Terminal result of one attempt.
///
/// ```text
/// Success | AlreadyHeld  → race won
/// Conflict               → this attempt ends, race continues
/// Transient | Unknown    → attempt retired, replaced if time remains
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    AlreadyHeld,
    Conflict,
    Transient(String),
    Unknown(String),
}

impl Outcome {
    /// Transient outcome with a clipped reason.
    pub fn transient(reason: impl AsRef<str>) -> Self {
        Outcome::Transient(clip_reason(reason.as_ref()))
    }

    /// Unknown outcome with a clipped reason.
    pub fn unknown(reason: impl AsRef<str>) -> Self {
        Outcome::Unknown(clip_reason(reason.as_ref()))
    }

    /// Returns true if this outcome wins the race.
    ///
    /// `Success` and `AlreadyHeld` are interchangeable here.
    pub fn is_win(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::AlreadyHeld)
    }

    /// Short tag without the reason.
    pub fn tag(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::AlreadyHeld => "already-held",
            Outcome::Conflict => "conflict",
            Outcome::Transient(_) => "transient",
            Outcome::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Transient(reason) | Outcome::Unknown(reason) => {
                write!(f, "{}: {}", self.tag(), reason)
            }
            _ => write!(f, "{}", self.tag()),
        }
    }
}

/// Clips `text` to [`MAX_REASON_CHARS`] characters on a char boundary.
pub fn clip_reason(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_REASON_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
