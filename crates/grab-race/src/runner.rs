//! # Sequential Target Runner
//!
//! One race per target, in rank order, until a target is won.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  for target in sort_by_rank(targets):                                   │
//! │     cancelled? ──────────────────────────► Skipped (rest), interrupted  │
//! │     ClockSynchronizer::synchronize ──► offset                           │
//! │     RaceWindow::derive(target_time, offset.now(), policy)               │
//! │     RaceScheduler::run                                                  │
//! │        Won ─────► stop (unless continue_after_success)                  │
//! │        Expired ─► SessionCheck::revalidate, next target                 │
//! │        Interrupted ─► stop, interrupted                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use grab_core::{sort_by_rank, CoreError, Outcome, RacePolicy, RaceWindow, Target};

use crate::client::{EnrollmentApi, SessionCheck};
use crate::clock::ClockSynchronizer;
use crate::error::RaceResult;
use crate::scheduler::{RaceScheduler, RaceVerdict};

// =============================================================================
// Summary Types
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerPolicy {
    /// Keep racing lower-ranked targets after a win.
    pub continue_after_success: bool,
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    Won(Outcome),
    /// The race expired; carries the last attempt outcome, if any.
    Lost(Option<Outcome>),
    /// Never raced.
    Skipped,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResult {
    pub target: Target,
    pub status: TargetStatus,
    pub attempts_launched: u64,
}

/// Per-target results in the order the targets were raced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub results: Vec<TargetResult>,
    pub interrupted: bool,
}

impl RunSummary {
    /// The first target won, if any.
    pub fn first_won(&self) -> Option<&Target> {
        self.won().next()
    }

    pub fn won(&self) -> impl Iterator<Item = &Target> {
        self.with_status(|s| matches!(s, TargetStatus::Won(_)))
    }

    pub fn lost(&self) -> impl Iterator<Item = &Target> {
        self.with_status(|s| matches!(s, TargetStatus::Lost(_)))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Target> {
        self.with_status(|s| matches!(s, TargetStatus::Skipped))
    }

    fn with_status<F>(&self, pred: F) -> impl Iterator<Item = &Target>
    where
        F: Fn(&TargetStatus) -> bool,
    {
        self.results
            .iter()
            .filter(move |r| pred(&r.status))
            .map(|r| &r.target)
    }

    fn skip_rest(&mut self, rest: &[Target]) {
        self.results.extend(rest.iter().map(|target| TargetResult {
            target: target.clone(),
            status: TargetStatus::Skipped,
            attempts_launched: 0,
        }));
    }
}

// =============================================================================
// Runner
// =============================================================================

pub struct SequentialTargetRunner<A: ?Sized> {
    scheduler: RaceScheduler<A>,
    clock: ClockSynchronizer,
    session: Arc<dyn SessionCheck>,
    race_policy: RacePolicy,
    policy: RunnerPolicy,
    cancel: CancellationToken,
}

impl<A: EnrollmentApi + ?Sized> SequentialTargetRunner<A> {
    pub fn new(
        scheduler: RaceScheduler<A>,
        clock: ClockSynchronizer,
        session: Arc<dyn SessionCheck>,
        race_policy: RacePolicy,
        cancel: CancellationToken,
    ) -> Self {
        SequentialTargetRunner {
            scheduler,
            clock,
            session,
            race_policy,
            policy: RunnerPolicy::default(),
            cancel,
        }
    }

    pub fn with_policy(mut self, policy: RunnerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Races every target in rank order against the same `target_time`.
    ///
    /// Only configuration errors escape; a lost race moves on to the next
    /// target.
    pub async fn run_all(&self, targets: &[Target], target_time: DateTime<Utc>) -> RaceResult<RunSummary> {
        if targets.is_empty() {
            return Err(CoreError::NoTargets.into());
        }
        let mut ordered = targets.to_vec();
        sort_by_rank(&mut ordered);

        let mut summary = RunSummary::default();

        for (i, target) in ordered.iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.interrupted = true;
                summary.skip_rest(&ordered[i..]);
                break;
            }

            let reading = self.clock.synchronize().await;
            let window = RaceWindow::derive(target_time, reading.offset.now(), &self.race_policy);
            info!(
                slot = %target.slot,
                label = %target.label,
                rank = target.rank,
                offset = %reading.offset,
                degraded = reading.degraded,
                "Racing target"
            );

            let report = self.scheduler.run(target, &window, reading.offset).await;
            let attempts_launched = report.attempts_launched;
            let rest = &ordered[i + 1..];

            match report.verdict {
                RaceVerdict::Won { outcome, .. } => {
                    summary.results.push(TargetResult {
                        target: target.clone(),
                        status: TargetStatus::Won(outcome),
                        attempts_launched,
                    });
                    if !self.policy.continue_after_success {
                        summary.skip_rest(rest);
                        break;
                    }
                }
                RaceVerdict::Interrupted => {
                    summary.results.push(TargetResult {
                        target: target.clone(),
                        status: TargetStatus::Interrupted,
                        attempts_launched,
                    });
                    summary.interrupted = true;
                    summary.skip_rest(rest);
                    break;
                }
                RaceVerdict::Expired => {
                    warn!(
                        slot = %target.slot,
                        label = %target.label,
                        attempts = attempts_launched,
                        "Target lost"
                    );
                    summary.results.push(TargetResult {
                        target: target.clone(),
                        status: TargetStatus::Lost(report.last_outcome),
                        attempts_launched,
                    });
                    if !rest.is_empty() && !self.cancel.is_cancelled() {
                        self.revalidate(rest).await?;
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn revalidate(&self, rest: &[Target]) -> RaceResult<()> {
        match self.session.revalidate().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_config_error() => {
                warn!(error = %e, remaining = rest.len(), "Session check failed, stopping");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Session check failed, continuing with current session");
                Ok(())
            }
        }
    }
}
