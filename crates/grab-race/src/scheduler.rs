//! # Race Scheduler
//!
//! Runs a bounded pool of concurrent attempts for one target.
//!
//! ## Race Timeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   now        window.start                              window.deadline  │
//! │    │  waiting     │   racing (≤ k attempts in flight)         │         │
//! │    ├──────────────┼───────────────────────────────────────────┤         │
//! │    │ status tick  │  #1 ──────✗                               │         │
//! │    │ every refresh│  #2 ────────────✗                         │         │
//! │    │              │       #3 ───✓  → abort rest, Won          │         │
//! │    │              │                                           │         │
//! │                                                                         │
//! │  Exit paths:                                                           │
//! │  • Success / AlreadyHeld   → Won (abort in-flight, launch no more)     │
//! │  • deadline reached        → Expired (abort in-flight)                 │
//! │  • cancellation token      → Interrupted (abort in-flight)             │
//! │  • Conflict / Transient / Unknown → refill the slot and keep going     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Wall-clock window bounds are converted to monotonic instants once, on
//! entry, using the corrected clock. Results of aborted attempts are never
//! read.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use grab_core::{Attempt, ClockOffset, Outcome, RaceWindow, Stage, Target};

use crate::client::EnrollmentApi;
use crate::observer::RaceObserver;
use crate::workflow::{AcquisitionWorkflow, AttemptReport};

// =============================================================================
// Race Result
// =============================================================================

/// How a race ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceVerdict {
    /// An attempt produced Success or AlreadyHeld.
    Won { seq: u64, outcome: Outcome },
    /// The deadline passed without a win.
    Expired,
    /// The cancellation token fired.
    Interrupted,
}

/// Summary of one race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceReport {
    pub verdict: RaceVerdict,
    pub attempts_launched: u64,
    /// Outcome of the most recently finished attempt.
    pub last_outcome: Option<Outcome>,
}

impl RaceReport {
    pub fn is_won(&self) -> bool {
        matches!(self.verdict, RaceVerdict::Won { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.verdict, RaceVerdict::Interrupted)
    }
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct RaceScheduler<A: ?Sized> {
    workflow: AcquisitionWorkflow<A>,
    observer: Arc<dyn RaceObserver>,
    cancel: CancellationToken,
    status_refresh: Duration,
}

impl<A: EnrollmentApi + ?Sized> RaceScheduler<A> {
    pub fn new(
        workflow: AcquisitionWorkflow<A>,
        observer: Arc<dyn RaceObserver>,
        cancel: CancellationToken,
    ) -> Self {
        RaceScheduler {
            workflow,
            observer,
            cancel,
            status_refresh: Duration::from_secs(1),
        }
    }

    /// Interval of `waiting` callbacks before the window opens.
    pub fn with_status_refresh(mut self, refresh: Duration) -> Self {
        self.status_refresh = refresh.max(Duration::from_millis(10));
        self
    }

    /// Races for `target` inside `window`.
    pub async fn run(&self, target: &Target, window: &RaceWindow, offset: ClockOffset) -> RaceReport {
        let now = offset.now();
        let entered = Instant::now();
        let start_at = entered + window.until_start(now);
        let deadline_at = entered + window.until_deadline(now);
        let concurrency = window.concurrency.max(1);

        info!(
            slot = %target.slot,
            label = %target.label,
            start = %window.start,
            deadline = %window.deadline,
            concurrency,
            "Race scheduled"
        );
        self.observer.race_started(target, window);

        if !self.wait_until(target, start_at).await {
            return self.finish(target, RaceVerdict::Interrupted, 0, None);
        }

        let mut set: JoinSet<AttemptReport> = JoinSet::new();
        let mut launched: u64 = 0;
        let mut last_outcome: Option<Outcome> = None;

        loop {
            while set.len() < concurrency && Instant::now() < deadline_at && !self.cancel.is_cancelled() {
                launched += 1;
                let seq = launched;
                let workflow = self.workflow.clone();
                let slot = target.slot;
                set.spawn(async move {
                    let mut attempt = Attempt::new(seq, slot);
                    workflow.execute(&mut attempt).await
                });
                self.observer.attempt_started(seq, set.len());
            }

            if set.is_empty() {
                let verdict = if self.cancel.is_cancelled() {
                    RaceVerdict::Interrupted
                } else {
                    RaceVerdict::Expired
                };
                return self.finish(target, verdict, launched, last_outcome);
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    set.shutdown().await;
                    return self.finish(target, RaceVerdict::Interrupted, launched, last_outcome);
                }
                _ = sleep_until(deadline_at) => {
                    set.shutdown().await;
                    return self.finish(target, RaceVerdict::Expired, launched, last_outcome);
                }
                joined = set.join_next() => {
                    let report = match joined {
                        Some(Ok(report)) => report,
                        Some(Err(e)) => {
                            warn!(error = %e, "Attempt task failed");
                            AttemptReport {
                                seq: 0,
                                stage: Stage::SubmitIntent,
                                outcome: Outcome::unknown("attempt task failed"),
                            }
                        }
                        None => continue,
                    };

                    self.observer.attempt_finished(&report, launched);

                    if report.outcome.is_win() {
                        set.shutdown().await;
                        let verdict = RaceVerdict::Won {
                            seq: report.seq,
                            outcome: report.outcome.clone(),
                        };
                        return self.finish(target, verdict, launched, Some(report.outcome));
                    }

                    if report.outcome == Outcome::Conflict {
                        debug!(seq = report.seq, "Conflict reported, race continues");
                    }
                    last_outcome = Some(report.outcome);
                }
            }
        }
    }

    /// Sleeps until `start_at` with periodic status ticks. False if cancelled.
    async fn wait_until(&self, target: &Target, start_at: Instant) -> bool {
        loop {
            let now = Instant::now();
            if now >= start_at {
                return true;
            }
            let remaining = start_at - now;
            self.observer.waiting(target, remaining);

            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = sleep(remaining.min(self.status_refresh)) => {}
            }
        }
    }

    fn finish(
        &self,
        target: &Target,
        verdict: RaceVerdict,
        launched: u64,
        last_outcome: Option<Outcome>,
    ) -> RaceReport {
        let report = RaceReport {
            verdict,
            attempts_launched: launched,
            last_outcome,
        };
        match &report.verdict {
            RaceVerdict::Won { seq, outcome } => info!(
                slot = %target.slot,
                seq,
                %outcome,
                launched,
                "Race won"
            ),
            RaceVerdict::Expired => warn!(
                slot = %target.slot,
                launched,
                last = ?report.last_outcome,
                "Race deadline reached without a win"
            ),
            RaceVerdict::Interrupted => info!(slot = %target.slot, launched, "Race interrupted"),
        }
        self.observer.race_finished(target, &report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RaceError;
    use crate::testing::{fast_policy, AttemptScript, FakeApi, RecordingObserver};
    use chrono::{TimeDelta, Utc};
    use grab_core::{RacePolicy, SlotId};

    fn target() -> Target {
        Target::new(SlotId(7), "高等数学", 1)
    }

    fn scheduler(api: Arc<FakeApi>, observer: Arc<RecordingObserver>) -> RaceScheduler<FakeApi> {
        RaceScheduler::new(
            AcquisitionWorkflow::new(api, fast_policy()),
            observer,
            CancellationToken::new(),
        )
    }

    /// Window opening now, closing after `overrun`.
    fn open_window(overrun: Duration, concurrency: usize) -> RaceWindow {
        let policy = RacePolicy::new(Duration::from_secs(5), overrun, concurrency).unwrap();
        let now = Utc::now();
        RaceWindow::derive(now - TimeDelta::seconds(1), now, &policy)
    }

    fn transient_after(delay_ms: u64) -> AttemptScript {
        AttemptScript {
            submit_delay: Duration::from_millis(delay_ms),
            intent_submit: Err(RaceError::ConnectionFailed("busy".into())),
            ..AttemptScript::success()
        }
    }

    fn success_after(delay_ms: u64) -> AttemptScript {
        AttemptScript {
            submit_delay: Duration::from_millis(delay_ms),
            ..AttemptScript::success()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_attempt_wins_after_two_transients() {
        // #1 fails at 100ms, #2 would fail at 300ms, #3 starts at 100ms and wins
        let api = Arc::new(FakeApi::new(vec![
            transient_after(100),
            transient_after(300),
            success_after(150),
        ]));
        let observer = Arc::new(RecordingObserver::default());
        let report = scheduler(api.clone(), observer.clone())
            .run(&target(), &open_window(Duration::from_secs(1), 2), ClockOffset::zero())
            .await;

        assert!(report.is_won());
        assert_eq!(report.attempts_launched, 3);
        assert_eq!(report.verdict, RaceVerdict::Won { seq: 3, outcome: Outcome::Success });
        assert!(api.peak_in_flight() <= 2);
        assert_eq!(observer.finished(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_one_never_overlaps() {
        let api = Arc::new(FakeApi::repeating(transient_after(50)));
        let observer = Arc::new(RecordingObserver::default());
        let report = scheduler(api.clone(), observer)
            .run(&target(), &open_window(Duration::from_millis(500), 1), ClockOffset::zero())
            .await;

        assert_eq!(report.verdict, RaceVerdict::Expired);
        assert!(report.attempts_launched >= 2);
        assert_eq!(api.peak_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_k_is_a_ceiling() {
        let api = Arc::new(FakeApi::repeating(transient_after(30)));
        let observer = Arc::new(RecordingObserver::default());
        let report = scheduler(api.clone(), observer)
            .run(&target(), &open_window(Duration::from_millis(400), 3), ClockOffset::zero())
            .await;

        assert_eq!(report.verdict, RaceVerdict::Expired);
        assert_eq!(api.peak_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_launches_nothing() {
        let api = Arc::new(FakeApi::repeating(success_after(10)));
        let observer = Arc::new(RecordingObserver::default());
        let now = Utc::now();
        let window = RaceWindow {
            start: now - TimeDelta::seconds(10),
            deadline: now - TimeDelta::seconds(5),
            concurrency: 4,
        };
        let report = scheduler(api.clone(), observer)
            .run(&target(), &window, ClockOffset::zero())
            .await;

        assert_eq!(report.verdict, RaceVerdict::Expired);
        assert_eq!(report.attempts_launched, 0);
        assert_eq!(api.intents(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_does_not_stop_race() {
        let conflict = AttemptScript {
            submit_delay: Duration::from_millis(20),
            confirm_reply: crate::api::TerminalResponse::new(
                "",
                grab_core::ResponseFields::failed("时间冲突"),
            ),
            ..AttemptScript::success()
        };
        let api = Arc::new(FakeApi::new(vec![conflict, success_after(20)]));
        let observer = Arc::new(RecordingObserver::default());
        let report = scheduler(api, observer.clone())
            .run(&target(), &open_window(Duration::from_secs(5), 1), ClockOffset::zero())
            .await;

        assert!(report.is_won());
        assert_eq!(report.attempts_launched, 2);
        assert_eq!(observer.outcomes()[0], Outcome::Conflict);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_held_wins_like_success() {
        let held = AttemptScript {
            submit_delay: Duration::from_millis(20),
            intent_reply: crate::api::TerminalResponse::new(
                "相同教学班只能选一次",
                grab_core::ResponseFields::default(),
            ),
            ..AttemptScript::success()
        };
        let api = Arc::new(FakeApi::new(vec![held]).then_repeat(transient_after(20)));
        let observer = Arc::new(RecordingObserver::default());
        let report = scheduler(api, observer)
            .run(&target(), &open_window(Duration::from_secs(5), 1), ClockOffset::zero())
            .await;

        assert_eq!(
            report.verdict,
            RaceVerdict::Won { seq: 1, outcome: Outcome::AlreadyHeld }
        );
        assert_eq!(report.attempts_launched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_win_stops_launching() {
        let api = Arc::new(FakeApi::new(vec![success_after(10)]).then_repeat(transient_after(1_000)));
        let observer = Arc::new(RecordingObserver::default());
        let report = scheduler(api.clone(), observer)
            .run(&target(), &open_window(Duration::from_secs(30), 4), ClockOffset::zero())
            .await;

        assert!(report.is_won());
        assert_eq!(report.attempts_launched, 4);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.intents(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_window_start() {
        let api = Arc::new(FakeApi::repeating(success_after(10)));
        let observer = Arc::new(RecordingObserver::default());
        let now = Utc::now();
        let window = RaceWindow {
            start: now + TimeDelta::milliseconds(2_500),
            deadline: now + TimeDelta::seconds(60),
            concurrency: 2,
        };
        let started = Instant::now();
        let report = scheduler(api, observer.clone())
            .with_status_refresh(Duration::from_secs(1))
            .run(&target(), &window, ClockOffset::zero())
            .await;

        assert!(report.is_won());
        assert!(started.elapsed() >= Duration::from_millis(2_400));
        assert!(observer.waits() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cancels_race() {
        let api = Arc::new(FakeApi::repeating(transient_after(100)));
        let observer = Arc::new(RecordingObserver::default());
        let cancel = CancellationToken::new();
        let scheduler = RaceScheduler::new(
            AcquisitionWorkflow::new(api, fast_policy()),
            observer,
            cancel.clone(),
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let report = scheduler
            .run(&target(), &open_window(Duration::from_secs(60), 2), ClockOffset::zero())
            .await;
        assert!(report.is_interrupted());
        assert!(report.attempts_launched >= 2);
    }
}
