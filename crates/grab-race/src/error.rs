//! # Race Error Types
//!
//! Error types for the race engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Race Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Rejected (result != 0) │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  MissingIdentifier      │ │
//! │  │  Credentials    │  │  Status (5xx)   │  │  DeserializationFailed  │ │
//! │  │  Targets        │  │  Clock          │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Attempt-level failures never surface as errors: the workflow turns    │
//! │  them into an Outcome. Only configuration errors and interrupt leave   │
//! │  the engine.                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use grab_core::CoreError;
use thiserror::Error;

/// Result type alias for race operations.
pub type RaceResult<T> = Result<T, RaceError>;

/// Race error type covering every failure the engine can observe.
#[derive(Debug, Error)]
pub enum RaceError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid service URL.
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Credentials file missing or malformed.
    #[error("Credentials unavailable: {0}")]
    MissingCredentials(String),

    /// The service refused the session (expired or wrong token).
    #[error("Credentials rejected: {0}")]
    CredentialsRejected(String),

    /// Credentials could not be written back.
    #[error("Failed to save credentials: {0}")]
    CredentialsSaveFailed(String),

    /// Target list missing or malformed.
    #[error("Failed to load targets: {0}")]
    TargetsLoadFailed(String),

    /// Domain validation failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// HTTP connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A call exceeded its per-call limit.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Non-success HTTP status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Time source sample failed.
    #[error("Clock sample failed: {0}")]
    Clock(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// The service answered with a non-zero result code.
    #[error("Rejected by service (result {code}): {message}")]
    Rejected { code: i64, message: String },

    /// A submission was accepted but carried no request identifier.
    #[error("Response carried no request identifier")]
    MissingIdentifier,

    /// Body could not be decoded.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl RaceError {
    /// Maps a `reqwest` failure of a call bounded by `limit`.
    pub fn http(err: reqwest::Error, limit: Duration) -> Self {
        if err.is_timeout() {
            RaceError::Timeout(limit.as_millis() as u64)
        } else if let Some(status) = err.status() {
            RaceError::Status(status.as_u16())
        } else if err.is_decode() {
            RaceError::DeserializationFailed(err.to_string())
        } else {
            RaceError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RaceError {
    fn from(err: serde_json::Error) -> Self {
        RaceError::DeserializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for RaceError {
    fn from(err: url::ParseError) -> Self {
        RaceError::InvalidUrl(err.to_string())
    }
}

impl From<toml::de::Error> for RaceError {
    fn from(err: toml::de::Error) -> Self {
        RaceError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl RaceError {
    /// Returns true if the operation can be retried.
    ///
    /// ## Retryable Errors
    /// - Connection failures
    /// - Timeouts
    /// - 5xx and 429 statuses
    /// - Clock sample failures
    pub fn is_retryable(&self) -> bool {
        match self {
            RaceError::ConnectionFailed(_) | RaceError::Timeout(_) | RaceError::Clock(_) => true,
            RaceError::Status(code) => *code >= 500 || *code == 429,
            _ => false,
        }
    }

    /// Returns true if this error means the run cannot proceed as configured.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RaceError::InvalidConfig(_)
                | RaceError::InvalidUrl(_)
                | RaceError::ConfigLoadFailed(_)
                | RaceError::MissingCredentials(_)
                | RaceError::CredentialsRejected(_)
                | RaceError::TargetsLoadFailed(_)
                | RaceError::Core(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(RaceError::ConnectionFailed("reset".into()).is_retryable());
        assert!(RaceError::Timeout(5000).is_retryable());
        assert!(RaceError::Status(502).is_retryable());
        assert!(RaceError::Status(429).is_retryable());

        assert!(!RaceError::Status(401).is_retryable());
        assert!(!RaceError::InvalidConfig("bad".into()).is_retryable());
        assert!(!RaceError::Rejected {
            code: 1,
            message: "nope".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(RaceError::from(CoreError::NoTargets).is_config_error());
        assert!(RaceError::CredentialsRejected("expired".into()).is_config_error());
        assert!(!RaceError::Timeout(1).is_config_error());
        assert!(!RaceError::CredentialsSaveFailed("read-only".into()).is_config_error());
        // a busy or closed service is not a configuration problem
        assert!(!RaceError::Rejected {
            code: 1,
            message: "系统繁忙".into()
        }
        .is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = RaceError::Rejected {
            code: 2,
            message: "turn closed".into(),
        };
        assert_eq!(err.to_string(), "Rejected by service (result 2): turn closed");
        assert_eq!(
            RaceError::from(CoreError::NoTargets).to_string(),
            "No targets to race for"
        );
    }
}
