//! # Error Types
//!
//! Domain-specific error types for grab-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  grab-core errors (this file)                                          │
//! │  └── CoreError        - Invalid targets, times and policies            │
//! │                                                                         │
//! │  grab-race errors (separate crate)                                     │
//! │  └── RaceError        - Config, transport, protocol, interrupt         │
//! │                                                                         │
//! │  Flow: CoreError → RaceError → anyhow (binary) → exit status           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Outcomes of an individual attempt are NOT errors; see [`crate::Outcome`].

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
///
/// Every variant is a configuration-category failure: it is surfaced to the
/// operator immediately and execution halts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Target time string could not be parsed.
    ///
    /// ## When This Occurs
    /// - Wrong length (expected 14 digits)
    /// - Out-of-range fields (month 13, hour 25, ...)
    /// - A local time that does not exist (DST gap)
    #[error("Invalid target time '{input}': expected YYYYMMDDhhmmss ({reason})")]
    InvalidTargetTime { input: String, reason: String },

    /// Race concurrency must allow at least one attempt in flight.
    #[error("Concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    /// Race timing policy cannot be represented as wall-clock arithmetic.
    #[error("Invalid race policy: {0}")]
    InvalidPolicy(String),

    /// No target could be resolved from configuration.
    #[error("No targets to race for")]
    NoTargets,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
