//! # Acquisition Workflow
//!
//! The four-stage protocol for one attempt.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  SubmitIntent ──────► PollIntentResult ──────► Confirm ──────► PollConfirmResult
//! │    │                    │                        │               │      │
//! │    │ error / no id      │ Success ─► continue    │ error         │ classify
//! │    ▼                    │ AlreadyHeld ─► stop    ▼               ▼      │
//! │  Transient              │ Conflict ─► stop     Transient    Outcome     │
//! │                         │ other ─► stop                                 │
//! │                         │ exhausted ─► Transient("no intent result")    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No stage lets an error escape: every failure becomes an [`Outcome`].
//! All state lives in the [`Attempt`] the caller hands in.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use grab_core::{Attempt, Outcome, Stage};

use crate::client::EnrollmentApi;
use crate::poll::{call_with_timeout, poll_until_ready, PollOutcome, PollPolicy};

// =============================================================================
// Policy & Report
// =============================================================================

/// Per-call and per-stage limits of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowPolicy {
    /// Limit on each submission call.
    pub request_timeout: Duration,
    pub intent: PollPolicy,
    pub confirm: PollPolicy,
}

impl WorkflowPolicy {
    /// Upper bound on the duration of one attempt.
    pub fn worst_case(&self) -> Duration {
        self.request_timeout * 2 + self.intent.worst_case() + self.confirm.worst_case()
    }
}

/// Terminal outcome of one attempt and the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub seq: u64,
    pub stage: Stage,
    pub outcome: Outcome,
}

// =============================================================================
// Workflow
// =============================================================================

/// Executes attempts against an [`EnrollmentApi`].
pub struct AcquisitionWorkflow<A: ?Sized> {
    api: Arc<A>,
    policy: WorkflowPolicy,
}

impl<A: ?Sized> Clone for AcquisitionWorkflow<A> {
    fn clone(&self) -> Self {
        AcquisitionWorkflow {
            api: Arc::clone(&self.api),
            policy: self.policy,
        }
    }
}

impl<A: EnrollmentApi + ?Sized> AcquisitionWorkflow<A> {
    pub fn new(api: Arc<A>, policy: WorkflowPolicy) -> Self {
        AcquisitionWorkflow { api, policy }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Runs `attempt` through all stages and reports its outcome.
    pub async fn execute(&self, attempt: &mut Attempt) -> AttemptReport {
        let (stage, outcome) = self.run_stages(attempt).await;
        debug!(
            seq = attempt.seq,
            slot = %attempt.slot,
            stage = %stage,
            outcome = %outcome,
            "Attempt finished"
        );
        AttemptReport {
            seq: attempt.seq,
            stage,
            outcome,
        }
    }

    async fn run_stages(&self, attempt: &mut Attempt) -> (Stage, Outcome) {
        // Stage 1: intent
        let intent_id = match call_with_timeout(
            self.policy.request_timeout,
            self.api.submit_intent(attempt.slot),
        )
        .await
        {
            Ok(id) => id,
            Err(e) => return (Stage::SubmitIntent, Outcome::transient(format!("intent: {}", e))),
        };
        attempt.intent_id = Some(intent_id.clone());

        // Stage 2: intent result
        let api = &self.api;
        let polled = poll_until_ready(&self.policy.intent, || api.poll_intent(&intent_id)).await;
        match polled {
            PollOutcome::Ready(response) => match response.classify() {
                Outcome::Success => {}
                other => return (Stage::PollIntentResult, other),
            },
            PollOutcome::NotReady => {
                return (Stage::PollIntentResult, Outcome::transient("no intent result"))
            }
            PollOutcome::Failed(reason) => {
                return (Stage::PollIntentResult, Outcome::transient(format!("intent poll: {}", reason)))
            }
        }

        // Stage 3: confirm
        let confirm_id = match call_with_timeout(
            self.policy.request_timeout,
            self.api.submit_confirm(attempt.slot, &intent_id),
        )
        .await
        {
            Ok(id) => id,
            Err(e) => return (Stage::Confirm, Outcome::transient(format!("confirm: {}", e))),
        };
        attempt.confirm_id = Some(confirm_id.clone());

        // Stage 4: confirm result
        let polled = poll_until_ready(&self.policy.confirm, || api.poll_confirm(&confirm_id)).await;
        let outcome = match polled {
            PollOutcome::Ready(response) => response.classify(),
            PollOutcome::NotReady => Outcome::transient("no confirm result"),
            PollOutcome::Failed(reason) => Outcome::transient(format!("confirm poll: {}", reason)),
        };
        (Stage::PollConfirmResult, outcome)
    }
}
