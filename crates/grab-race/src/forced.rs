//! # Forced Attempts
//!
//! A bounded burst of full attempts against the top-ranked target before
//! any waiting, for lessons that may already be open.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  for seq in 1..=budget:                                                 │
//! │     cancelled? ─────────────► stop                                      │
//! │     AcquisitionWorkflow::execute                                        │
//! │        win ─────────────────► stop, skip the race                       │
//! │        anything else ───────► sleep(gap), next                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Attempts run one at a time; nothing overlaps.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use grab_core::{Attempt, Outcome, Target};

use crate::client::EnrollmentApi;
use crate::observer::{NoOpObserver, RaceObserver};
use crate::workflow::AcquisitionWorkflow;

/// Pause between consecutive forced attempts.
pub const FORCED_GAP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedReport {
    /// Attempts actually executed.
    pub attempts: u32,
    /// Outcome of the last executed attempt.
    pub last_outcome: Option<Outcome>,
    pub interrupted: bool,
}

impl ForcedReport {
    pub fn won(&self) -> bool {
        self.last_outcome.as_ref().is_some_and(Outcome::is_win)
    }
}

pub struct ForcedAttempts<A: ?Sized> {
    workflow: AcquisitionWorkflow<A>,
    observer: Arc<dyn RaceObserver>,
    cancel: CancellationToken,
}

impl<A: EnrollmentApi + ?Sized> ForcedAttempts<A> {
    pub fn new(workflow: AcquisitionWorkflow<A>, cancel: CancellationToken) -> Self {
        ForcedAttempts {
            workflow,
            observer: Arc::new(NoOpObserver),
            cancel,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RaceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs up to `budget` attempts on `target`, stopping at the first win.
    pub async fn run(&self, target: &Target, budget: u32) -> ForcedReport {
        info!(slot = %target.slot, label = %target.label, budget, "Forcing attempts");
        let mut report = ForcedReport {
            attempts: 0,
            last_outcome: None,
            interrupted: false,
        };

        for seq in 1..=budget {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            self.observer.attempt_started(u64::from(seq), 1);
            let mut attempt = Attempt::new(u64::from(seq), target.slot);
            let finished = self.workflow.execute(&mut attempt).await;
            self.observer.attempt_finished(&finished, u64::from(seq));

            report.attempts = seq;
            let won = finished.outcome.is_win();
            report.last_outcome = Some(finished.outcome);
            if won {
                info!(slot = %target.slot, attempts = seq, "Forced attempt won");
                return report;
            }

            if seq < budget {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        report.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(FORCED_GAP) => {}
                }
            }
        }

        if let Some(outcome) = &report.last_outcome {
            warn!(slot = %target.slot, attempts = report.attempts, last = %outcome, "Forced attempts exhausted");
        }
        report
    }
}
