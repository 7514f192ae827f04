//! # Wire Types
//!
//! JSON bodies exchanged with the course-selection service.
//!
//! ## Envelope
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  { "result": 0, "message": "...", "data": <payload | null> }            │
//! │                                                                         │
//! │  result != 0   → RaceError::Rejected                                    │
//! │  data == null  → poll not ready yet                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Endpoints
//! | Method | Path                                         | Data          |
//! |--------|----------------------------------------------|---------------|
//! | GET    | `/{student}/turn/{probe}/select`             | `TurnData`    |
//! | POST   | `/query-lesson/{student}/{turn}`             | `LessonPage`  |
//! | POST   | `/add-predicate`                             | request id    |
//! | GET    | `/predicate-response/{student}/{request}`    | `IntentResult`|
//! | POST   | `/add-request`                               | request id    |
//! | GET    | `/add-drop-response/{student}/{request}`     | `ConfirmResult`|

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use grab_core::{classify, Lesson, Outcome, ResponseFields, SlotId};

use crate::error::{RaceError, RaceResult};

// =============================================================================
// Envelope
// =============================================================================

/// Common response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub result: i64,

    #[serde(default)]
    pub message: Option<String>,

    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Returns the payload, or `Rejected` when the result code is non-zero.
    pub fn into_data(self) -> RaceResult<Option<T>> {
        if self.result != 0 {
            return Err(RaceError::Rejected {
                code: self.result,
                message: self.message.unwrap_or_else(|| "unknown error".into()),
            });
        }
        Ok(self.data)
    }
}

/// Extracts a request id from a submission's `data` field.
///
/// The service sends it as a string; numbers are accepted too.
pub fn request_id_of(data: Option<Value>) -> RaceResult<String> {
    match data {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(RaceError::MissingIdentifier),
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Body of `add-predicate` (intent) and `add-request` (confirm).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRequest {
    pub student_assoc: i64,
    pub course_select_turn_assoc: i64,
    pub request_middle_dtos: Vec<RequestMiddleDto>,
    pub course_pack_assoc: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMiddleDto {
    pub lesson_assoc: i64,
    pub virtual_cost: Option<i64>,
}

impl SelectionRequest {
    /// Intent body: virtual cost 0.
    pub fn intent(student: i64, turn: i64, slot: SlotId) -> Self {
        Self::build(student, turn, slot, Some(0))
    }

    /// Confirm body: virtual cost null.
    pub fn confirm(student: i64, turn: i64, slot: SlotId) -> Self {
        Self::build(student, turn, slot, None)
    }

    fn build(student: i64, turn: i64, slot: SlotId, virtual_cost: Option<i64>) -> Self {
        SelectionRequest {
            student_assoc: student,
            course_select_turn_assoc: turn,
            request_middle_dtos: vec![RequestMiddleDto {
                lesson_assoc: slot.0,
                virtual_cost,
            }],
            course_pack_assoc: None,
        }
    }
}

/// Body of `query-lesson`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonQuery {
    pub turn_id: i64,
    pub student_id: i64,
    pub semester_id: i64,
    pub page_no: u32,
    pub page_size: u32,
    pub course_id: Option<i64>,
    pub course_name_or_code: String,
    pub can_select: u8,
    pub sort_field: &'static str,
    pub sort_type: &'static str,
}

impl LessonQuery {
    /// A name query takes precedence over a course id.
    pub fn new(course_name: &str, course_id: Option<i64>, page_no: u32, page_size: u32) -> Self {
        LessonQuery {
            turn_id: 0,
            student_id: 0,
            semester_id: 0,
            page_no,
            page_size,
            course_id: if course_name.is_empty() { course_id } else { None },
            course_name_or_code: course_name.to_string(),
            can_select: 1,
            sort_field: "lesson",
            sort_type: "ASC",
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Localized message object: `{text, textZh, textEn}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Text {
    pub text: Option<String>,
    pub text_zh: Option<String>,
    pub text_en: Option<String>,
}

impl Text {
    /// First non-empty of `text`, `textZh`, `textEn`.
    pub fn best(&self) -> Option<&str> {
        [&self.text, &self.text_zh, &self.text_en]
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
            .find(|s| !s.trim().is_empty())
    }
}

/// Selection-period descriptor returned by the turn probe.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TurnData {
    pub turn: TurnRef,
    pub semester: SemesterRef,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TurnRef {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterRef {
    pub id: i64,
    #[serde(default)]
    pub name_zh: String,
}

/// One page of `query-lesson`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LessonPage {
    pub lessons: Vec<Lesson>,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    pub total_pages: Option<u32>,
    pub total_rows: Option<u32>,
}

/// Terminal payload of `predicate-response`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntentResult {
    pub success: Option<bool>,
    /// Per-lesson messages keyed by lesson id.
    pub result: Option<BTreeMap<String, Value>>,
    pub error_message: Option<Text>,
}

/// Payload of `add-drop-response`. An empty object means not ready.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmResult {
    pub success: Option<bool>,
    pub error_message: Option<Text>,
}

impl ConfirmResult {
    pub fn is_terminal(&self) -> bool {
        self.success == Some(true) || self.error_message.as_ref().and_then(Text::best).is_some()
    }
}

// =============================================================================
// Terminal Response
// =============================================================================

/// A terminal poll response reduced to what the classifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalResponse {
    /// Raw human-readable text.
    pub text: String,
    pub fields: ResponseFields,
}

impl TerminalResponse {
    pub fn new(text: impl Into<String>, fields: ResponseFields) -> Self {
        TerminalResponse {
            text: text.into(),
            fields,
        }
    }

    pub fn from_intent(result: &IntentResult) -> Self {
        let mut messages = Vec::new();
        if let Some(text) = result.error_message.as_ref().and_then(Text::best) {
            messages.push(text.to_string());
        }
        for entry in result.result.iter().flat_map(|map| map.values()) {
            if let Some(text) = text_of(entry) {
                messages.push(text);
            }
        }
        TerminalResponse {
            text: messages.join("; "),
            fields: ResponseFields {
                success: result.success,
                messages,
            },
        }
    }

    pub fn from_confirm(result: &ConfirmResult) -> Self {
        let messages: Vec<String> = result
            .error_message
            .as_ref()
            .and_then(Text::best)
            .map(|t| vec![t.to_string()])
            .unwrap_or_default();
        TerminalResponse {
            text: messages.join("; "),
            fields: ResponseFields {
                success: result.success,
                messages,
            },
        }
    }

    pub fn classify(&self) -> Outcome {
        classify(&self.text, &self.fields)
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(_) => serde_json::from_value::<Text>(value.clone())
            .ok()
            .and_then(|t| t.best().map(str::to_string)),
        _ => None,
    }
}
