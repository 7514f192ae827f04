//! # grab-core: Pure Domain Logic for Lesson Grab
//!
//! This crate holds every rule of the race engine that can be expressed
//! without touching the network or a timer.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Lesson Grab Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    grab (CLI binary)                            │   │
//! │  │    args ──► credentials ──► targets ──► runner ──► summary      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    grab-race (async engine)                     │   │
//! │  │   clock sync, HTTP workflow, race scheduler, target runner      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ grab-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ classify  │  │  filter   │  │ validation│  │   │
//! │  │   │  Target   │  │  Outcome  │  │  Lesson   │  │  target   │  │   │
//! │  │   │  Window   │  │  markers  │  │  Filter   │  │  time     │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • NO NETWORK • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Target, ClockOffset, RaceWindow, Attempt, Outcome)
//! - [`classify`] - Terminal response classification with an explicit marker table
//! - [`filter`] - Catalog lesson descriptors and filter criteria
//! - [`validation`] - Target time parsing
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use grab_core::classify::{classify, ResponseFields};
//! use grab_core::Outcome;
//!
//! let fields = ResponseFields::failed("相同教学班只能选一次");
//! assert_eq!(classify("相同教学班只能选一次", &fields), Outcome::AlreadyHeld);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod classify;
pub mod error;
pub mod filter;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use classify::{classify, ResponseFields};
pub use error::{CoreError, CoreResult};
pub use filter::{CourseInfo, Lesson, LessonFilter, LocalizedText, Teacher, DEFAULT_CAMPUS};
pub use types::*;
pub use validation::{parse_target_time, TARGET_TIME_FORMAT};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of characters of raw server text kept in an outcome reason.
///
/// Status lines are redrawn many times per second; long server messages are
/// clipped so the line stays on one terminal row.
pub const MAX_REASON_CHARS: usize = 80;
