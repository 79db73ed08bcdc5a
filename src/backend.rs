use async_trait::async_trait;

use crate::error::BackendError;
use crate::models::{
    AssessmentType, ConversionRule, GradeValue, HistoryRecord, LedgerRecord, PersistedConversion,
    ReconciledGrade, StudentProfile, TransferResponse,
};
use crate::reconcile::reconcile;

/// The remote academic API the core reads snapshots from and delegates
/// mutations to. The core never reimplements these operations.
#[async_trait]
pub trait AcademicBackend: Send + Sync {
    async fn fetch_history(&self, student_id: &str) -> Result<Vec<HistoryRecord>, BackendError>;

    async fn fetch_ledger(&self, student_id: &str) -> Result<Vec<LedgerRecord>, BackendError>;

    async fn fetch_rules(&self) -> Result<Vec<ConversionRule>, BackendError>;

    async fn fetch_profile(&self, student_id: &str) -> Result<StudentProfile, BackendError>;

    async fn create_ledger_record(
        &self,
        student_id: &str,
        subject_id: &str,
        kind: AssessmentType,
        grade: &GradeValue,
    ) -> Result<LedgerRecord, BackendError>;

    async fn persist_conversion(
        &self,
        ledger_record_id: &str,
        rule_code: &str,
    ) -> Result<PersistedConversion, BackendError>;

    async fn transfer_institution(
        &self,
        student_id: &str,
        destination_institution_id: &str,
        rule_code: &str,
    ) -> Result<TransferResponse, BackendError>;
}

/// Looks up a rule by code in a fetched rule list.
pub fn find_rule<'a>(rules: &'a [ConversionRule], code: &str) -> Option<&'a ConversionRule> {
    rules.iter().find(|rule| rule.code == code)
}

/// Takes both snapshots for one student and reconciles them.
pub async fn fetch_reconciled<B: AcademicBackend + ?Sized>(
    backend: &B,
    student_id: &str,
) -> Result<Vec<ReconciledGrade>, BackendError> {
    let (history, ledger) = tokio::try_join!(
        backend.fetch_history(student_id),
        backend.fetch_ledger(student_id)
    )?;
    Ok(reconcile(&history, &ledger))
}
