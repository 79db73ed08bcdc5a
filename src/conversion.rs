use serde::Serialize;
use tracing::{info, warn};

use crate::backend::AcademicBackend;
use crate::error::{CoreError, CoreResult};
use crate::matcher::{self, NO_MATCH_LABEL};
use crate::models::{ConversionRule, ConvertedGrade, ConvertedValue, GradeValue, ReconciledGrade};

/// Renders a grade for display: whole numbers without decimals, other
/// numbers with exactly two, letters verbatim.
pub fn format_grade(value: &GradeValue) -> String {
    match value {
        GradeValue::Numeric(number) if number.fract() == 0.0 => format!("{number:.0}"),
        GradeValue::Numeric(number) => format!("{number:.2}"),
        GradeValue::Letter(text) => text.clone(),
    }
}

pub fn format_converted(value: &ConvertedValue) -> String {
    match value {
        ConvertedValue::Matched(grade) => format_grade(grade),
        ConvertedValue::NoMatch => NO_MATCH_LABEL.to_string(),
    }
}

/// Maps every reconciled grade through `rule`. A malformed rule fails the
/// whole call; the reconciled set itself is never modified.
pub fn preview(reconciled: &[ReconciledGrade], rule: &ConversionRule) -> CoreResult<Vec<ConvertedGrade>> {
    matcher::validate_rule(rule)?;
    Ok(reconciled
        .iter()
        .map(|grade| ConvertedGrade {
            reconciled: grade.clone(),
            rule_code: rule.code.clone(),
            converted_value: matcher::find_match(rule, &grade.grade_value),
        })
        .collect())
}

/// Previews each rule independently, so one malformed rule does not hide the
/// others.
pub fn preview_all<'a>(
    reconciled: &[ReconciledGrade],
    rules: &'a [ConversionRule],
) -> Vec<(&'a ConversionRule, CoreResult<Vec<ConvertedGrade>>)> {
    rules
        .iter()
        .map(|rule| (rule, preview(reconciled, rule)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedConversion {
    pub subject_id: String,
    pub ledger_record_id: String,
    pub rule_code: String,
    pub previewed_value: ConvertedValue,
    pub persisted_value: GradeValue,
}

impl AppliedConversion {
    /// The collaborator stored what the user was shown.
    pub fn matches_preview(&self) -> bool {
        match &self.previewed_value {
            ConvertedValue::Matched(value) => format_grade(value) == format_grade(&self.persisted_value),
            ConvertedValue::NoMatch => false,
        }
    }
}

/// Persists individual conversion decisions through the grading collaborator.
pub struct ConversionService<'a, B: AcademicBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: AcademicBackend + ?Sized> ConversionService<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Stores `target`'s rule against its ledger record. Grades without a
    /// ledger record fail with [`CoreError::NotPersistable`] before any call
    /// is made.
    pub async fn apply(&self, target: &ConvertedGrade) -> CoreResult<AppliedConversion> {
        let ledger_record_id = target
            .reconciled
            .ledger_record_id
            .clone()
            .ok_or_else(|| CoreError::NotPersistable {
                subject_id: target.reconciled.subject_id.clone(),
            })?;

        let persisted = self
            .backend
            .persist_conversion(&ledger_record_id, &target.rule_code)
            .await?;

        let applied = AppliedConversion {
            subject_id: target.reconciled.subject_id.clone(),
            ledger_record_id,
            rule_code: target.rule_code.clone(),
            previewed_value: target.converted_value.clone(),
            persisted_value: persisted.converted_value,
        };

        if applied.matches_preview() {
            info!(
                subject = %applied.subject_id,
                ledger_record = %applied.ledger_record_id,
                rule = %applied.rule_code,
                value = %format_grade(&applied.persisted_value),
                "persisted conversion"
            );
        } else {
            warn!(
                subject = %applied.subject_id,
                ledger_record = %applied.ledger_record_id,
                rule = %applied.rule_code,
                previewed = %format_converted(&applied.previewed_value),
                persisted = %format_grade(&applied.persisted_value),
                "persisted conversion differs from preview"
            );
        }

        Ok(applied)
    }

    /// Creates the ledger record a grade is missing and returns the grade
    /// carrying its id, ready for [`ConversionService::apply`].
    pub async fn create_missing_record(
        &self,
        student_id: &str,
        target: &ConvertedGrade,
    ) -> CoreResult<ConvertedGrade> {
        if target.reconciled.is_persistable() {
            return Ok(target.clone());
        }

        let record = self
            .backend
            .create_ledger_record(
                student_id,
                &target.reconciled.subject_id,
                target.reconciled.grade_type,
                &target.reconciled.grade_value,
            )
            .await?;

        info!(subject = %target.reconciled.subject_id, ledger_record = %record.id, "backfilled ledger record");

        let mut updated = target.clone();
        updated.reconciled.ledger_record_id = Some(record.id);
        Ok(updated)
    }
}
