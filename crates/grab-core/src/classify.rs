//! # Outcome Classification
//!
//! Maps the terminal response of one attempt to an [`Outcome`].
//!
//! ## Decision Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. any ALREADY_HELD marker in text/messages  → AlreadyHeld             │
//! │  2. any CONFLICT marker in text/messages      → Conflict                │
//! │  3. success flag == true                      → Success                 │
//! │  4. success flag == false                     → Transient(reason)       │
//! │  5. nothing usable                            → Unknown(reason)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Markers win over the success flag: the service reports a duplicate
//! enrollment as a failure even though the slot is held.

use crate::types::{clip_reason, Outcome};

// =============================================================================
// Marker Table
// =============================================================================

/// Substrings meaning the account already holds the slot.
pub const ALREADY_HELD_MARKERS: &[&str] = &["相同教学班只能选一次", "Duplicate lessons are not allowed"];

/// Substrings meaning the slot collides with one already held.
pub const CONFLICT_MARKERS: &[&str] = &["时间冲突", "time conflict"];

// =============================================================================
// Response Fields
// =============================================================================

/// Structured fields extracted from a terminal response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseFields {
    /// The service's success flag, if it sent one.
    pub success: Option<bool>,

    /// Every human-readable message found in the response.
    pub messages: Vec<String>,
}

impl ResponseFields {
    /// A response that reported success with no messages.
    pub fn succeeded() -> Self {
        ResponseFields {
            success: Some(true),
            messages: Vec::new(),
        }
    }

    /// A response that reported failure with one message.
    pub fn failed(message: impl Into<String>) -> Self {
        ResponseFields {
            success: Some(false),
            messages: vec![message.into()],
        }
    }

    fn is_empty(&self) -> bool {
        self.success.is_none() && self.messages.iter().all(|m| m.trim().is_empty())
    }
}

// =============================================================================
// Classifier
// =============================================================================

/// Classifies a terminal response. Total: every input maps to an outcome.
pub fn classify(text: &str, fields: &ResponseFields) -> Outcome {
    if contains_any(text, fields, ALREADY_HELD_MARKERS) {
        return Outcome::AlreadyHeld;
    }
    if contains_any(text, fields, CONFLICT_MARKERS) {
        return Outcome::Conflict;
    }

    match fields.success {
        Some(true) => Outcome::Success,
        Some(false) => match reason_of(text, fields) {
            Some(reason) => Outcome::transient(reason),
            None => Outcome::transient("rejected"),
        },
        None if text.trim().is_empty() && fields.is_empty() => Outcome::unknown("empty response"),
        None => match reason_of(text, fields) {
            Some(reason) => Outcome::Unknown(clip_reason(&reason)),
            None => Outcome::unknown("empty response"),
        },
    }
}

fn contains_any(text: &str, fields: &ResponseFields, markers: &[&str]) -> bool {
    std::iter::once(text)
        .chain(fields.messages.iter().map(String::as_str))
        .any(|haystack| markers.iter().any(|marker| contains_marker(haystack, marker)))
}

/// ASCII markers match case-insensitively, others verbatim.
fn contains_marker(haystack: &str, marker: &str) -> bool {
    if marker.is_ascii() {
        haystack.to_ascii_lowercase().contains(&marker.to_ascii_lowercase())
    } else {
        haystack.contains(marker)
    }
}

fn reason_of(text: &str, fields: &ResponseFields) -> Option<String> {
    let from_messages: Vec<&str> = fields
        .messages
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .collect();
    if !from_messages.is_empty() {
        return Some(from_messages.join("; "));
    }
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_flag() {
        assert_eq!(classify("", &ResponseFields::succeeded()), Outcome::Success);
    }

    #[test]
    fn test_already_held_beats_failure_flag() {
        let fields = ResponseFields::failed("Duplicate lessons are not allowed");
        assert_eq!(classify("", &fields), Outcome::AlreadyHeld);
        // marker in raw text only
        assert_eq!(
            classify("错误：相同教学班只能选一次", &ResponseFields::default()),
            Outcome::AlreadyHeld
        );
    }

    #[test]
    fn test_conflict_markers() {
        let fields = ResponseFields::failed("与已选课程时间冲突");
        assert_eq!(classify("", &fields), Outcome::Conflict);
        assert_eq!(
            classify("Time Conflict with lesson 12", &ResponseFields::default()),
            Outcome::Conflict
        );
    }

    #[test]
    fn test_already_held_beats_conflict() {
        let fields = ResponseFields {
            success: Some(false),
            messages: vec!["时间冲突".into(), "相同教学班只能选一次".into()],
        };
        assert_eq!(classify("", &fields), Outcome::AlreadyHeld);
    }

    #[test]
    fn test_failure_is_transient_with_reason() {
        let fields = ResponseFields::failed("课程已满");
        assert_eq!(classify("", &fields), Outcome::Transient("课程已满".into()));
        let bare = ResponseFields {
            success: Some(false),
            messages: vec![],
        };
        assert_eq!(classify("", &bare), Outcome::Transient("rejected".into()));
    }

    #[test]
    fn test_empty_is_unknown() {
        assert_eq!(
            classify("", &ResponseFields::default()),
            Outcome::Unknown("empty response".into())
        );
        assert_eq!(
            classify("   ", &ResponseFields::default()),
            Outcome::Unknown("empty response".into())
        );
    }

    #[test]
    fn test_unrecognized_text_is_unknown() {
        let outcome = classify("<html>gateway error</html>", &ResponseFields::default());
        assert_eq!(outcome, Outcome::Unknown("<html>gateway error</html>".into()));
    }

    #[test]
    fn test_reason_is_clipped() {
        let long = "x".repeat(500);
        match classify(&long, &ResponseFields::default()) {
            Outcome::Unknown(reason) => {
                assert_eq!(reason.chars().count(), crate::MAX_REASON_CHARS + 1)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
