//! # Race Observer
//!
//! Progress callbacks from the scheduler and runner, so the engine never
//! writes to the terminal itself. The binary renders them as one
//! overwritten status line; tests record them.

use std::time::Duration;

use grab_core::{RaceWindow, Target};

use crate::scheduler::RaceReport;
use crate::workflow::AttemptReport;

/// Receives race progress. All methods default to no-ops.
pub trait RaceObserver: Send + Sync {
    /// A race for `target` is about to wait for its window.
    fn race_started(&self, _target: &Target, _window: &RaceWindow) {}

    /// Periodic tick while waiting for the window to open.
    fn waiting(&self, _target: &Target, _remaining: Duration) {}

    /// Attempt `seq` was launched; `in_flight` includes it.
    fn attempt_started(&self, _seq: u64, _in_flight: usize) {}

    /// An attempt finished; `launched` counts every attempt so far.
    fn attempt_finished(&self, _report: &AttemptReport, _launched: u64) {}

    fn race_finished(&self, _target: &Target, _report: &RaceReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

impl RaceObserver for NoOpObserver {}
