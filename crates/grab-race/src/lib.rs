//! # grab-race: Race Engine for Lesson Grab
//!
//! Everything that talks to the network or waits on a timer: clock
//! synchronization, the enrollment HTTP protocol, the concurrent race and the
//! per-target loop.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Race Engine                                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │              SequentialTargetRunner (per-target loop)            │  │
//! │  │   rank order • fresh offset per race • revalidate after a loss   │  │
//! │  └────────────┬───────────────────────────────┬─────────────────────┘  │
//! │               ▼                               ▼                         │
//! │  ┌────────────────────────┐     ┌──────────────────────────────────┐   │
//! │  │  ClockSynchronizer     │     │  RaceScheduler                   │   │
//! │  │  SNTP samples → offset │────►│  wait for window, k attempts in  │   │
//! │  │  degrades to zero      │     │  flight, first win aborts rest   │   │
//! │  └────────────────────────┘     └──────────────┬───────────────────┘   │
//! │                                                ▼                        │
//! │                                 ┌──────────────────────────────────┐   │
//! │                                 │  AcquisitionWorkflow             │   │
//! │                                 │  intent ► poll ► confirm ► poll  │   │
//! │                                 │  every failure → Outcome         │   │
//! │                                 └──────────────┬───────────────────┘   │
//! │                                                ▼                        │
//! │                                 ┌──────────────────────────────────┐   │
//! │                                 │  EnrollmentApi (trait)           │   │
//! │                                 │  HttpEnrollmentApi over reqwest  │   │
//! │                                 └──────────────────────────────────┘   │
//! │                                                                         │
//! │  Around the race: RaceConfig (TOML + env), Session (credentials,       │
//! │  selection period), Catalog (target list → slots), Preflight.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Engine
//! - [`clock`] - SNTP time source and offset estimation
//! - [`workflow`] - The four-stage attempt
//! - [`scheduler`] - Bounded concurrent race for one target
//! - [`runner`] - Sequential races over ranked targets
//! - [`observer`] - Progress callbacks
//! - [`poll`] - Timeouts and bounded polling
//!
//! ### Service
//! - [`api`] - Wire types
//! - [`client`] - API traits and the HTTP implementation
//! - [`session`] - Credentials and the authenticated session handle
//! - [`catalog`] - Target list loading and lesson lookup
//! - [`preflight`] - Pre-race probe
//! - [`forced`] - Sequential forced attempts before waiting
//!
//! ### Support
//! - [`config`] - TOML configuration with environment overrides
//! - [`error`] - Error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use grab_race::*;
//!
//! let config = RaceConfig::load(None)?;
//! config.validate()?;
//! let credentials = Credentials::load(&config.files.credentials)?;
//! let session = Session::establish(credentials, &config.service).await?;
//! let api = Arc::new(HttpEnrollmentApi::new(session, config.service.clone()));
//!
//! let workflow = AcquisitionWorkflow::new(api.clone(), config.workflow_policy());
//! let scheduler = RaceScheduler::new(workflow, Arc::new(NoOpObserver), cancel.clone());
//! let clock = ClockSynchronizer::sntp(&config.clock.server, config.sync_policy());
//! let runner = SequentialTargetRunner::new(scheduler, clock, api, config.race_policy()?, cancel);
//!
//! let summary = runner.run_all(&targets, target_time).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod api;
pub mod catalog;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod forced;
pub mod observer;
pub mod poll;
pub mod preflight;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod workflow;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use catalog::{load_target_specs, Catalog, TargetSpec};
pub use client::{EnrollmentApi, HttpEnrollmentApi, LessonSource, SessionCheck};
pub use clock::{ClockReading, ClockSynchronizer, SntpTimeSource, SyncPolicy, TimeSource};
pub use config::RaceConfig;
pub use error::{RaceError, RaceResult};
pub use forced::{ForcedAttempts, ForcedReport, FORCED_GAP};
pub use observer::{NoOpObserver, RaceObserver};
pub use poll::PollPolicy;
pub use preflight::Preflight;
pub use runner::{RunSummary, RunnerPolicy, SequentialTargetRunner, TargetResult, TargetStatus};
pub use scheduler::{RaceReport, RaceScheduler, RaceVerdict};
pub use session::{Credentials, Session, TurnInfo};
pub use workflow::{AcquisitionWorkflow, AttemptReport, WorkflowPolicy};
