use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A grade as it arrives from either store: a number on some scale, or a
/// letter such as `"B+"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GradeValue {
    Numeric(f64),
    Letter(String),
}

impl GradeValue {
    /// Numeric reading of the value. Letters that spell a finite number
    /// (`"8.5"`) count as numeric; `"NaN"` or `"inf"` stay letters.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            GradeValue::Numeric(value) => Some(*value),
            GradeValue::Letter(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite()),
        }
    }

    /// The value is something a rule can be applied to: a non-empty letter,
    /// or a finite number above zero.
    pub fn is_convertible(&self) -> bool {
        match self {
            GradeValue::Numeric(value) => value.is_finite() && *value > 0.0,
            GradeValue::Letter(text) => {
                if text.trim().is_empty() {
                    return false;
                }
                match self.as_number() {
                    Some(value) => value > 0.0,
                    None => true,
                }
            }
        }
    }

    /// Reads the value as a 0-10 number, mapping letter grades onto the
    /// numeric scale. Unknown letters read as 0.
    pub fn normalized_score(&self) -> f64 {
        if let Some(value) = self.as_number() {
            return value;
        }
        match self {
            GradeValue::Letter(text) => match text.trim().to_ascii_uppercase().as_str() {
                "A" => 10.0,
                "B+" => 8.0,
                "B" => 7.0,
                "C+" => 6.0,
                "C" => 5.0,
                "D" => 4.0,
                "F" => 2.0,
                _ => 0.0,
            },
            GradeValue::Numeric(_) => 0.0,
        }
    }
}

impl fmt::Display for GradeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradeValue::Numeric(value) => write!(f, "{value}"),
            GradeValue::Letter(text) => f.write_str(text),
        }
    }
}

impl From<f64> for GradeValue {
    fn from(value: f64) -> Self {
        GradeValue::Numeric(value)
    }
}

impl From<&str> for GradeValue {
    fn from(value: &str) -> Self {
        GradeValue::Letter(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentType {
    #[serde(alias = "PARCIAL_1")]
    Partial1,
    #[serde(alias = "PARCIAL_2")]
    Partial2,
    Midterm,
    Final,
    FinalProject,
    #[serde(alias = "PREVIO")]
    Previous,
}

/// Which grade slot of a history record an assessment type feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeSlot {
    FirstPartial,
    SecondPartial,
    Final,
    Previous,
}

impl AssessmentType {
    /// Only closing assessments can carry a conversion.
    pub fn is_conversion_eligible(self) -> bool {
        matches!(
            self,
            AssessmentType::Final | AssessmentType::Previous | AssessmentType::FinalProject
        )
    }

    pub fn history_slot(self) -> GradeSlot {
        match self {
            AssessmentType::Partial1 | AssessmentType::Midterm => GradeSlot::FirstPartial,
            AssessmentType::Partial2 => GradeSlot::SecondPartial,
            AssessmentType::Final | AssessmentType::FinalProject => GradeSlot::Final,
            AssessmentType::Previous => GradeSlot::Previous,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentType::Partial1 => "PARTIAL_1",
            AssessmentType::Partial2 => "PARTIAL_2",
            AssessmentType::Midterm => "MIDTERM",
            AssessmentType::Final => "FINAL",
            AssessmentType::FinalProject => "FINAL_PROJECT",
            AssessmentType::Previous => "PREVIOUS",
        }
    }
}

impl fmt::Display for AssessmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closing grades at or above this pass the course.
pub const PASSING_GRADE: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectStatus {
    #[serde(alias = "CURSANDO")]
    Enrolled,
    #[serde(alias = "APROBADO")]
    Approved,
    #[serde(alias = "REPROBADO")]
    Failed,
    #[serde(alias = "APROBADO (EQUIVALENCIA)")]
    ApprovedByEquivalency,
}

impl SubjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectStatus::Enrolled => "ENROLLED",
            SubjectStatus::Approved => "APPROVED",
            SubjectStatus::Failed => "FAILED",
            SubjectStatus::ApprovedByEquivalency => "APPROVED_BY_EQUIVALENCY",
        }
    }
}

impl fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectGrades {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_partial: Option<GradeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_partial: Option<GradeValue>,
    #[serde(default, rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_grade: Option<GradeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<GradeValue>,
}

impl SubjectGrades {
    pub fn slot_mut(&mut self, slot: GradeSlot) -> &mut Option<GradeValue> {
        match slot {
            GradeSlot::FirstPartial => &mut self.first_partial,
            GradeSlot::SecondPartial => &mut self.second_partial,
            GradeSlot::Final => &mut self.final_grade,
            GradeSlot::Previous => &mut self.previous,
        }
    }
}

/// Annotation carried by a subject approved through an institution transfer.
/// The four fields only ever exist together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equivalency {
    pub original_grade: GradeValue,
    pub origin_subject_name: String,
    pub conversion_method: String,
    pub conversion_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub subject_id: String,
    pub subject_name: String,
    pub subject_code: String,
    #[serde(default)]
    pub grades: SubjectGrades,
    pub status: SubjectStatus,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equivalency: Option<Equivalency>,
}

impl HistoryRecord {
    pub fn is_homologated(&self) -> bool {
        self.status == SubjectStatus::ApprovedByEquivalency && self.equivalency.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalValue {
    #[serde(rename = "type")]
    pub kind: AssessmentType,
    pub grade: GradeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionEntry {
    pub rule_code: String,
    pub converted_value: GradeValue,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub original_value: OriginalValue,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversions: Vec<ConversionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMapping {
    pub source_value: GradeValue,
    pub destination_value: GradeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRule {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub mapping: Vec<RuleMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledGrade {
    pub subject_id: String,
    pub subject_name: String,
    pub subject_code: String,
    pub grade_value: GradeValue,
    pub grade_type: AssessmentType,
    pub ledger_record_id: Option<String>,
    pub status: SubjectStatus,
    pub equivalency: Option<Equivalency>,
}

impl ReconciledGrade {
    /// Conversion actions stay disabled until a ledger record backs the grade.
    pub fn is_persistable(&self) -> bool {
        self.ledger_record_id.is_some()
    }

    pub fn is_homologated(&self) -> bool {
        self.status == SubjectStatus::ApprovedByEquivalency && self.equivalency.is_some()
    }
}

/// Outcome of running one grade through a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConvertedValue {
    Matched(GradeValue),
    NoMatch,
}

impl ConvertedValue {
    pub fn matched(&self) -> Option<&GradeValue> {
        match self {
            ConvertedValue::Matched(value) => Some(value),
            ConvertedValue::NoMatch => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertedGrade {
    pub reconciled: ReconciledGrade,
    pub rule_code: String,
    pub converted_value: ConvertedValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub institution_id: String,
    pub institution_name: String,
}

/// The locally cached signed-in user, owned by the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
}

impl CurrentUser {
    /// Returns a new user value carrying the profile's institution fields.
    pub fn with_profile(&self, profile: &StudentProfile) -> CurrentUser {
        CurrentUser {
            institution_id: Some(profile.institution_id.clone()),
            institution_name: Some(profile.institution_name.clone()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedConversion {
    pub converted_value: GradeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResponse {
    pub total_homologated: u32,
    pub updated_student_profile: StudentProfile,
}
