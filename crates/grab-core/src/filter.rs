//! # Catalog Filtering
//!
//! Lesson descriptors as the catalog returns them, and the criteria used
//! to pick one lesson per configured target.
//!
//! Every criterion is a plain substring test against the lesson's
//! schedule text (`dateTimePlace.textZh`); an empty or zero criterion
//! matches everything.

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::types::{SlotId, Target};

/// Campus assumed when a target does not name one.
pub const DEFAULT_CAMPUS: &str = "磬苑校区";

const WEEKDAY_NAMES: [&str; 7] = [
    "星期一", "星期二", "星期三", "星期四", "星期五", "星期六", "星期日",
];

// =============================================================================
// Lesson Descriptor
// =============================================================================

/// One lesson row from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Lesson {
    pub id: i64,
    pub course: CourseInfo,
    pub teachers: Vec<Teacher>,
    pub date_time_place: LocalizedText,
    pub limit_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseInfo {
    pub name_zh: String,
    pub code: String,
    pub credits: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Teacher {
    pub name_zh: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalizedText {
    pub text_zh: String,
}

impl Lesson {
    pub fn slot(&self) -> SlotId {
        SlotId(self.id)
    }

    /// Schedule text the filter criteria are matched against.
    pub fn schedule(&self) -> &str {
        &self.date_time_place.text_zh
    }

    pub fn teacher_names(&self) -> String {
        self.teachers
            .iter()
            .map(|t| t.name_zh.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Builds the race target for this lesson at the given rank.
    pub fn to_target(&self, rank: u32) -> Target {
        let label = if self.schedule().is_empty() {
            self.course.name_zh.clone()
        } else {
            format!("{} [{}]", self.course.name_zh, self.schedule())
        };
        Target::new(self.slot(), label, rank)
    }
}

// =============================================================================
// Filter Criteria
// =============================================================================

/// Criteria selecting one lesson of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonFilter {
    /// Substring of the course name.
    #[serde(default)]
    pub course_name: String,

    /// Week range as printed in the schedule, e.g. `1~16周`.
    #[serde(default)]
    pub weeks: String,

    /// 1 = Monday ... 7 = Sunday, 0 = any.
    #[serde(default, deserialize_with = "number_or_text")]
    pub weekday: u8,

    #[serde(default, deserialize_with = "number_or_text")]
    pub start_unit: u32,

    #[serde(default, deserialize_with = "number_or_text")]
    pub end_unit: u32,

    #[serde(default = "default_campus")]
    pub campus: String,

    /// Building or room substring, e.g. `博北A101`.
    #[serde(default)]
    pub building: String,
}

fn default_campus() -> String {
    DEFAULT_CAMPUS.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

/// Accepts `3`, `"3"`, `""` or `null`; the last two mean "any" (0).
fn number_or_text<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + Default,
{
    let raw = match Option::<NumberOrText>::deserialize(deserializer)? {
        None => return Ok(T::default()),
        Some(NumberOrText::Number(n)) => n,
        Some(NumberOrText::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(T::default());
            }
            text.parse::<u64>()
                .map_err(|_| <D::Error as de::Error>::custom(format!("expected a number, got \"{}\"", text)))?
        }
    };
    T::try_from(raw).map_err(|_| <D::Error as de::Error>::custom(format!("{} is out of range", raw)))
}

impl Default for LessonFilter {
    fn default() -> Self {
        LessonFilter {
            course_name: String::new(),
            weeks: String::new(),
            weekday: 0,
            start_unit: 0,
            end_unit: 0,
            campus: default_campus(),
            building: String::new(),
        }
    }
}

impl LessonFilter {
    /// Weekday name as printed in the schedule, if a weekday is set.
    pub fn weekday_name(&self) -> Option<&'static str> {
        match self.weekday {
            1..=7 => Some(WEEKDAY_NAMES[usize::from(self.weekday) - 1]),
            _ => None,
        }
    }

    /// Unit range pattern, e.g. `3~4节`, if both ends are set.
    pub fn unit_pattern(&self) -> Option<String> {
        (self.start_unit > 0 && self.end_unit > 0)
            .then(|| format!("{}~{}节", self.start_unit, self.end_unit))
    }

    pub fn matches(&self, lesson: &Lesson) -> bool {
        if !self.course_name.is_empty() && !lesson.course.name_zh.contains(&self.course_name) {
            return false;
        }

        let schedule = lesson.schedule();
        if !self.weeks.is_empty() && !schedule.contains(&self.weeks) {
            return false;
        }
        if self.weekday != 0 {
            // out-of-range weekday never matches
            match self.weekday_name() {
                Some(name) if schedule.contains(name) => {}
                _ => return false,
            }
        }
        if let Some(pattern) = self.unit_pattern() {
            if !schedule.contains(&pattern) {
                return false;
            }
        }
        if !self.campus.is_empty() && !schedule.contains(&self.campus) {
            return false;
        }
        if !self.building.is_empty() && !schedule.contains(&self.building) {
            return false;
        }
        true
    }

    /// First matching lesson, in catalog order.
    pub fn first_match<'a>(&self, lessons: &'a [Lesson]) -> Option<&'a Lesson> {
        lessons.iter().find(|l| self.matches(l))
    }
}
