//! Terminal rendering: one overwritten spinner line during a race and a
//! colored summary afterwards.

use std::sync::Mutex;
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use grab_core::{Outcome, RaceWindow, Target};
use grab_race::{AttemptReport, RaceObserver, RaceReport, RaceVerdict, RunSummary, TargetStatus};

#[derive(Default)]
struct LineState {
    label: String,
    in_flight: usize,
    launched: u64,
    last: Option<Outcome>,
}

/// [`RaceObserver`] that redraws a single spinner line.
pub struct SpinnerObserver {
    bar: ProgressBar,
    state: Mutex<LineState>,
}

impl SpinnerObserver {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            bar.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"]));
        }
        SpinnerObserver {
            bar,
            state: Mutex::new(LineState::default()),
        }
    }

    /// Starts a fresh line for `label`.
    pub fn begin(&self, label: &str) {
        self.bar.reset();
        self.bar.enable_steady_tick(Duration::from_millis(80));
        if let Ok(mut state) = self.state.lock() {
            *state = LineState {
                label: label.to_string(),
                ..LineState::default()
            };
            self.redraw(&state);
        }
    }

    /// Replaces the line with `line` and stops the spinner.
    pub fn finish(&self, line: String) {
        self.bar.finish_with_message(line);
    }

    fn redraw(&self, state: &LineState) {
        let last = match &state.last {
            Some(outcome) => outcome.to_string(),
            None => "-".to_string(),
        };
        self.bar.set_message(format!(
            "{} | in flight {} | launched {} | last: {}",
            state.label, state.in_flight, state.launched, last
        ));
    }
}

impl RaceObserver for SpinnerObserver {
    fn race_started(&self, target: &Target, _window: &RaceWindow) {
        self.begin(&target.label);
    }

    fn waiting(&self, target: &Target, remaining: Duration) {
        self.bar.set_message(format!(
            "{} | opens in {:.1}s",
            target.label,
            remaining.as_secs_f64()
        ));
    }

    fn attempt_started(&self, _seq: u64, in_flight: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight = in_flight;
            state.launched += 1;
            self.redraw(&state);
        }
    }

    fn attempt_finished(&self, report: &AttemptReport, launched: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.launched = launched;
            state.last = Some(report.outcome.clone());
            self.redraw(&state);
        }
    }

    fn race_finished(&self, target: &Target, report: &RaceReport) {
        let line = match &report.verdict {
            RaceVerdict::Won { outcome, .. } => {
                format!("{} {} ({})", "[+]".green(), target.label, outcome)
            }
            RaceVerdict::Expired => format!(
                "{} {} not acquired after {} attempts",
                "[!]".red(),
                target.label,
                report.attempts_launched
            ),
            RaceVerdict::Interrupted => format!("{} {} interrupted", "[*]".yellow(), target.label),
        };
        self.finish(line);
    }
}

/// Prints the per-target summary.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Summary".cyan().bold());
    println!("{}", "=".repeat(50).cyan());

    for result in &summary.results {
        let target = &result.target;
        match &result.status {
            TargetStatus::Won(outcome) => println!(
                "{} #{} {} ({}, {} attempts)",
                "[+]".green(),
                target.rank,
                target.label,
                outcome,
                result.attempts_launched
            ),
            TargetStatus::Lost(last) => println!(
                "{} #{} {} (last: {}, {} attempts)",
                "[-]".red(),
                target.rank,
                target.label,
                last.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into()),
                result.attempts_launched
            ),
            TargetStatus::Skipped => {
                println!("{} #{} {} (skipped)", "[ ]".dimmed(), target.rank, target.label)
            }
            TargetStatus::Interrupted => {
                println!("{} #{} {} (interrupted)", "[*]".yellow(), target.rank, target.label)
            }
        }
    }

    match summary.first_won() {
        Some(target) => println!("{} Acquired: {}", "[+]".green().bold(), target),
        None if summary.interrupted => println!("{} Interrupted", "[*]".yellow().bold()),
        None => println!("{} No target acquired", "[!]".red().bold()),
    }
}
