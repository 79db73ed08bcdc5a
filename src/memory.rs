use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::backend::{find_rule, AcademicBackend};
use crate::error::BackendError;
use crate::matcher;
use crate::models::{
    AssessmentType, ConversionEntry, ConversionRule, ConvertedValue, Equivalency, GradeValue,
    HistoryRecord, LedgerRecord, OriginalValue, PersistedConversion, StudentProfile,
    SubjectStatus, TransferResponse,
};
use crate::snapshot::Snapshot;

/// In-process collaborator serving a [`Snapshot`]. Behaves like the remote
/// API for offline runs and tests.
pub struct MemoryBackend {
    state: Mutex<Snapshot>,
}

impl MemoryBackend {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.clone()
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.state.into_inner()
    }
}

fn rule_match(rule: &ConversionRule, grade: &GradeValue) -> Result<ConvertedValue, BackendError> {
    matcher::match_grade(rule, grade).map_err(|err| BackendError::Rejected(err.to_string()))
}

fn student<'a>(snapshot: &'a Snapshot, student_id: &str) -> Result<&'a StudentProfile, BackendError> {
    snapshot
        .students
        .iter()
        .find(|student| student.id == student_id)
        .ok_or_else(|| BackendError::not_found("student", student_id))
}

#[async_trait]
impl AcademicBackend for MemoryBackend {
    async fn fetch_history(&self, student_id: &str) -> Result<Vec<HistoryRecord>, BackendError> {
        let state = self.state.lock().await;
        student(&state, student_id)?;
        Ok(state.history.get(student_id).cloned().unwrap_or_default())
    }

    async fn fetch_ledger(&self, student_id: &str) -> Result<Vec<LedgerRecord>, BackendError> {
        let state = self.state.lock().await;
        student(&state, student_id)?;
        Ok(state
            .ledger
            .iter()
            .filter(|record| record.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn fetch_rules(&self) -> Result<Vec<ConversionRule>, BackendError> {
        Ok(self.state.lock().await.rules.clone())
    }

    async fn fetch_profile(&self, student_id: &str) -> Result<StudentProfile, BackendError> {
        let state = self.state.lock().await;
        student(&state, student_id).cloned()
    }

    async fn create_ledger_record(
        &self,
        student_id: &str,
        subject_id: &str,
        kind: AssessmentType,
        grade: &GradeValue,
    ) -> Result<LedgerRecord, BackendError> {
        let mut state = self.state.lock().await;
        student(&state, student_id)?;

        let record = LedgerRecord {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            subject_id: subject_id.to_string(),
            original_value: OriginalValue {
                kind,
                grade: grade.clone(),
            },
            created_at: Utc::now(),
            conversions: Vec::new(),
        };
        state.ledger.push(record.clone());

        // Logged grades also land on the matching history entry, letters read
        // on the numeric scale.
        if let Some(entry) = state
            .history
            .get_mut(student_id)
            .and_then(|records| records.iter_mut().find(|entry| entry.subject_id == subject_id))
        {
            *entry.grades.slot_mut(kind.history_slot()) =
                Some(GradeValue::Numeric(grade.normalized_score()));
        }

        info!(ledger_record = %record.id, subject = subject_id, "created ledger record");
        Ok(record)
    }

    async fn persist_conversion(
        &self,
        ledger_record_id: &str,
        rule_code: &str,
    ) -> Result<PersistedConversion, BackendError> {
        let mut state = self.state.lock().await;
        let rule = find_rule(&state.rules, rule_code)
            .cloned()
            .ok_or_else(|| BackendError::not_found("conversion rule", rule_code))?;
        let record = state
            .ledger
            .iter_mut()
            .find(|record| record.id == ledger_record_id)
            .ok_or_else(|| BackendError::not_found("ledger record", ledger_record_id))?;

        let converted_value = match rule_match(&rule, &record.original_value.grade)? {
            ConvertedValue::Matched(value) => value,
            ConvertedValue::NoMatch => {
                return Err(BackendError::Rejected(format!(
                    "no equivalence for grade {} in rule {}",
                    record.original_value.grade, rule_code
                )))
            }
        };

        record.conversions.push(ConversionEntry {
            rule_code: rule_code.to_string(),
            converted_value: converted_value.clone(),
            applied_at: Utc::now(),
        });

        Ok(PersistedConversion { converted_value })
    }

    async fn transfer_institution(
        &self,
        student_id: &str,
        destination_institution_id: &str,
        rule_code: &str,
    ) -> Result<TransferResponse, BackendError> {
        let mut state = self.state.lock().await;
        let current = student(&state, student_id)?.clone();
        let destination = state
            .institutions
            .iter()
            .find(|institution| institution.id == destination_institution_id)
            .cloned()
            .ok_or_else(|| BackendError::not_found("institution", destination_institution_id))?;
        let rule = find_rule(&state.rules, rule_code)
            .cloned()
            .ok_or_else(|| BackendError::not_found("conversion rule", rule_code))?;

        if current.institution_id == destination.id {
            return Err(BackendError::Rejected(format!(
                "student {student_id} already belongs to {}",
                destination.name
            )));
        }

        // Compute every conversion before touching the record so a bad rule
        // leaves the student unchanged.
        let now = Utc::now();
        let mut homologations = Vec::new();
        if let Some(records) = state.history.get(student_id) {
            for (index, record) in records.iter().enumerate() {
                if record.status != SubjectStatus::Approved {
                    continue;
                }
                let original = match record.grades.final_grade.as_ref().or(record.grades.previous.as_ref()) {
                    Some(grade) => grade.clone(),
                    None => continue,
                };
                if let ConvertedValue::Matched(converted) = rule_match(&rule, &original)? {
                    homologations.push((index, original, converted));
                }
            }
        }

        let total_homologated = homologations.len() as u32;
        if let Some(records) = state.history.get_mut(student_id) {
            for (index, original, converted) in homologations {
                let record = &mut records[index];
                record.status = SubjectStatus::ApprovedByEquivalency;
                record.grades.final_grade = Some(converted);
                record.equivalency = Some(Equivalency {
                    original_grade: original,
                    origin_subject_name: record.subject_name.clone(),
                    conversion_method: rule_code.to_string(),
                    conversion_date: now,
                });
            }
        }

        let profile = state
            .students
            .iter_mut()
            .find(|student| student.id == student_id)
            .ok_or_else(|| BackendError::not_found("student", student_id))?;
        profile.institution_id = destination.id.clone();
        profile.institution_name = destination.name.clone();
        let updated_student_profile = profile.clone();

        info!(
            student = student_id,
            institution = %destination.id,
            total_homologated,
            "transferred student"
        );

        Ok(TransferResponse {
            total_homologated,
            updated_student_profile,
        })
    }
}
