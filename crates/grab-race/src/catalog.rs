//! # Target Catalog
//!
//! Turns the operator's target list into race [`Target`]s.
//!
//! ```text
//! list.json ──► TargetSpec[] (sorted by priority)
//!                  │
//!                  ├── lesson_id set ──────────────► Target
//!                  └── filter ──► query-lesson pages ──► first match ──► Target
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use grab_core::{CoreError, Lesson, LessonFilter, SlotId, Target};

use crate::api::LessonQuery;
use crate::client::LessonSource;
use crate::error::{RaceError, RaceResult};

/// Lessons requested per catalog page.
pub const PAGE_SIZE: u32 = 200;

// =============================================================================
// Target Specs
// =============================================================================

/// One entry of the target list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetSpec {
    #[serde(flatten)]
    pub filter: LessonFilter,

    /// Course id, used when no course name is given.
    #[serde(default)]
    pub course_id: Option<i64>,

    /// Known lesson id; skips the catalog query.
    #[serde(default)]
    pub lesson_id: Option<i64>,

    /// Lower goes first. Defaults to the 1-based list position.
    #[serde(default)]
    pub priority: Option<u32>,
}

impl TargetSpec {
    pub fn rank(&self) -> u32 {
        self.priority.unwrap_or(u32::MAX)
    }

    fn describe(&self) -> String {
        if !self.filter.course_name.is_empty() {
            self.filter.course_name.clone()
        } else if let Some(id) = self.course_id {
            format!("course {}", id)
        } else if let Some(id) = self.lesson_id {
            format!("lesson {}", id)
        } else {
            "unnamed course".to_string()
        }
    }
}

/// Reads target specs from a JSON array file.
pub fn load_target_specs(path: &Path) -> RaceResult<Vec<TargetSpec>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RaceError::TargetsLoadFailed(format!("{}: {}", path.display(), e)))?;
    parse_target_specs(&content)
}

/// Parses a JSON array of target specs.
///
/// Entries that are not objects, or do not deserialize, are skipped with a
/// warning. The result is sorted by priority, ties in list order.
pub fn parse_target_specs(content: &str) -> RaceResult<Vec<TargetSpec>> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| RaceError::TargetsLoadFailed(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(RaceError::TargetsLoadFailed(
            "target list must be a JSON array".into(),
        ));
    };

    let mut specs = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let position = idx + 1;
        if !item.is_object() {
            warn!(entry = position, "Skipping target entry, not an object");
            continue;
        }
        match serde_json::from_value::<TargetSpec>(item) {
            Ok(mut spec) => {
                spec.priority.get_or_insert(position as u32);
                specs.push(spec);
            }
            Err(e) => warn!(entry = position, error = %e, "Skipping malformed target entry"),
        }
    }

    specs.sort_by_key(TargetSpec::rank);
    Ok(specs)
}

// =============================================================================
// Catalog
// =============================================================================

/// Resolves specs against a [`LessonSource`].
pub struct Catalog<S: ?Sized> {
    source: Arc<S>,
    page_size: u32,
}

impl<S: LessonSource + ?Sized> Catalog<S> {
    pub fn new(source: Arc<S>) -> Self {
        Catalog {
            source,
            page_size: PAGE_SIZE,
        }
    }

    /// Resolves every spec, dropping the ones with no matching lesson.
    ///
    /// Fails only when nothing resolves or on a configuration error.
    pub async fn resolve(&self, specs: &[TargetSpec]) -> RaceResult<Vec<Target>> {
        let mut targets = Vec::with_capacity(specs.len());

        for spec in specs {
            match self.resolve_one(spec).await {
                Ok(Some(target)) => {
                    info!(slot = %target.slot, label = %target.label, rank = target.rank, "Target resolved");
                    targets.push(target);
                }
                Ok(None) => warn!(course = %spec.describe(), "No lesson matches, target dropped"),
                Err(e) if e.is_config_error() => return Err(e),
                Err(e) => warn!(course = %spec.describe(), error = %e, "Lookup failed, target dropped"),
            }
        }

        if targets.is_empty() {
            return Err(CoreError::NoTargets.into());
        }
        Ok(targets)
    }

    async fn resolve_one(&self, spec: &TargetSpec) -> RaceResult<Option<Target>> {
        let rank = spec.rank();
        if let Some(id) = spec.lesson_id {
            return Ok(Some(Target::new(SlotId(id), spec.describe(), rank)));
        }
        Ok(self.find_lesson(spec).await?.map(|lesson| lesson.to_target(rank)))
    }

    /// Pages through the catalog until the first lesson the filter accepts.
    pub async fn find_lesson(&self, spec: &TargetSpec) -> RaceResult<Option<Lesson>> {
        let mut page_no = 1;
        let mut total_pages = 1;

        while page_no <= total_pages {
            let query = LessonQuery::new(&spec.filter.course_name, spec.course_id, page_no, self.page_size);
            let page = self.source.query_lessons(query).await?;
            total_pages = total_pages.max(page.page_info.total_pages.unwrap_or(1));

            if let Some(lesson) = spec.filter.first_match(&page.lessons) {
                debug!(
                    lesson_id = lesson.id,
                    page = page_no,
                    total_pages,
                    teachers = %lesson.teacher_names(),
                    "Lesson matched"
                );
                return Ok(Some(lesson.clone()));
            }
            if page.lessons.is_empty() {
                break;
            }
            page_no += 1;
        }
        Ok(None)
    }
}
