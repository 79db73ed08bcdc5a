use std::collections::HashMap;

use tracing::debug;

use crate::models::{AssessmentType, HistoryRecord, LedgerRecord, ReconciledGrade, SubjectStatus};

/// Ledger records grouped by `subject_id`, keeping their original order
/// inside each group.
struct LedgerIndex<'a> {
    by_subject: HashMap<&'a str, Vec<&'a LedgerRecord>>,
}

impl<'a> LedgerIndex<'a> {
    fn new(ledger: &'a [LedgerRecord]) -> Self {
        let mut by_subject: HashMap<&'a str, Vec<&'a LedgerRecord>> = HashMap::new();
        for record in ledger {
            by_subject
                .entry(record.subject_id.as_str())
                .or_default()
                .push(record);
        }
        Self { by_subject }
    }

    /// Prefers a closing-assessment record; falls back to any record for the
    /// subject.
    fn best_match(&self, subject_id: &str) -> Option<&'a LedgerRecord> {
        let candidates = self.by_subject.get(subject_id)?;
        candidates
            .iter()
            .find(|record| record.original_value.kind.is_conversion_eligible())
            .or_else(|| candidates.first())
            .copied()
    }
}

/// Merges a student's completion history with their raw-grade ledger into one
/// entry per convertible history record, in history order.
pub fn reconcile(history: &[HistoryRecord], ledger: &[LedgerRecord]) -> Vec<ReconciledGrade> {
    let index = LedgerIndex::new(ledger);
    let mut reconciled = Vec::with_capacity(history.len());

    for record in history {
        let (grade_value, grade_type) = match (&record.grades.final_grade, &record.grades.previous) {
            (Some(final_grade), _) => (final_grade.clone(), AssessmentType::Final),
            (None, Some(previous)) => (previous.clone(), AssessmentType::Previous),
            (None, None) => continue,
        };

        if !grade_value.is_convertible() {
            debug!(subject = %record.subject_code, grade = %grade_value, "dropping grade with nothing to convert");
            continue;
        }

        let ledger_record_id = index
            .best_match(&record.subject_id)
            .map(|ledger_record| ledger_record.id.clone());

        debug!(
            subject = %record.subject_code,
            grade_type = %grade_type,
            ledger_record = ?ledger_record_id,
            "reconciled subject"
        );

        reconciled.push(ReconciledGrade {
            subject_id: record.subject_id.clone(),
            subject_name: record.subject_name.clone(),
            subject_code: record.subject_code.clone(),
            grade_value,
            grade_type,
            ledger_record_id,
            status: record.status,
            // An annotation only counts alongside the equivalency status.
            equivalency: record
                .equivalency
                .clone()
                .filter(|_| record.status == SubjectStatus::ApprovedByEquivalency),
        });
    }

    reconciled
}
