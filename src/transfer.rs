use serde::Serialize;
use tracing::{info, warn};

use crate::backend::AcademicBackend;
use crate::error::CoreResult;
use crate::models::{CurrentUser, ReconciledGrade, StudentProfile};
use crate::reconcile::reconcile;

/// Committed state after an institution change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferOutcome {
    pub user: CurrentUser,
    pub profile: StudentProfile,
    /// Reconciled record read back after the transfer. `None` when that read
    /// failed; the transfer still stands and the record can be fetched again.
    pub record: Option<Vec<ReconciledGrade>>,
    pub total_homologated: u32,
}

impl TransferOutcome {
    pub fn is_refreshed(&self) -> bool {
        self.record.is_some()
    }

    pub fn homologated(&self) -> impl Iterator<Item = &ReconciledGrade> {
        self.record
            .iter()
            .flatten()
            .filter(|grade| grade.is_homologated())
    }
}

/// Drives the institution change. Homologation itself happens in the
/// collaborator; this only sequences the transfer and the refresh that
/// follows it.
pub struct TransferEquivalencyCoordinator<'a, B: AcademicBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: AcademicBackend + ?Sized> TransferEquivalencyCoordinator<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Transfers `student_id` and returns the committed view. `user` is only
    /// read: if the transfer call fails the caller keeps its current value,
    /// otherwise it replaces it with `TransferOutcome::user` wholesale. The
    /// institution fields are merged only when `user` is the transferred
    /// student.
    ///
    /// Once the collaborator accepts the transfer this never returns an error.
    /// A failed refresh falls back to the profile in the transfer response and
    /// leaves `TransferOutcome::record` empty.
    pub async fn coordinate_transfer(
        &self,
        user: &CurrentUser,
        student_id: &str,
        destination_institution_id: &str,
        rule_code: &str,
    ) -> CoreResult<TransferOutcome> {
        let response = self
            .backend
            .transfer_institution(student_id, destination_institution_id, rule_code)
            .await?;

        info!(
            student = student_id,
            institution = destination_institution_id,
            rule = rule_code,
            total_homologated = response.total_homologated,
            "institution transfer committed"
        );

        let refreshed = tokio::try_join!(
            self.backend.fetch_profile(student_id),
            self.backend.fetch_history(student_id),
            self.backend.fetch_ledger(student_id)
        );

        let (profile, record) = match refreshed {
            Ok((profile, history, ledger)) => (profile, Some(reconcile(&history, &ledger))),
            Err(err) => {
                warn!(
                    student = student_id,
                    error = %err,
                    "refresh after transfer failed; using the transfer response"
                );
                (response.updated_student_profile, None)
            }
        };

        let user = if user.id == student_id {
            user.with_profile(&profile)
        } else {
            user.clone()
        };

        Ok(TransferOutcome {
            user,
            profile,
            record,
            total_homologated: response.total_homologated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::error::{BackendError, CoreError};
    use crate::memory::MemoryBackend;
    use crate::models::{
        AssessmentType, ConversionRule, GradeValue, HistoryRecord, LedgerRecord,
        PersistedConversion, TransferResponse,
    };
    use crate::snapshot;

    /// Serves reads from the inner backend until a transfer goes through,
    /// then fails every read.
    struct ReadsFailAfterTransfer {
        inner: MemoryBackend,
        transferred: AtomicBool,
    }

    impl ReadsFailAfterTransfer {
        fn new(inner: MemoryBackend) -> Self {
            Self {
                inner,
                transferred: AtomicBool::new(false),
            }
        }

        fn check(&self) -> Result<(), BackendError> {
            if self.transferred.load(Ordering::SeqCst) {
                return Err(BackendError::Server {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AcademicBackend for ReadsFailAfterTransfer {
        async fn fetch_history(&self, student_id: &str) -> Result<Vec<HistoryRecord>, BackendError> {
            self.check()?;
            self.inner.fetch_history(student_id).await
        }
        async fn fetch_ledger(&self, student_id: &str) -> Result<Vec<LedgerRecord>, BackendError> {
            self.check()?;
            self.inner.fetch_ledger(student_id).await
        }
        async fn fetch_rules(&self) -> Result<Vec<ConversionRule>, BackendError> {
            self.check()?;
            self.inner.fetch_rules().await
        }
        async fn fetch_profile(&self, student_id: &str) -> Result<StudentProfile, BackendError> {
            self.check()?;
            self.inner.fetch_profile(student_id).await
        }
        async fn create_ledger_record(
            &self,
            student_id: &str,
            subject_id: &str,
            kind: AssessmentType,
            grade: &GradeValue,
        ) -> Result<LedgerRecord, BackendError> {
            self.inner.create_ledger_record(student_id, subject_id, kind, grade).await
        }
        async fn persist_conversion(
            &self,
            ledger_record_id: &str,
            rule_code: &str,
        ) -> Result<PersistedConversion, BackendError> {
            self.inner.persist_conversion(ledger_record_id, rule_code).await
        }
        async fn transfer_institution(
            &self,
            student_id: &str,
            destination_institution_id: &str,
            rule_code: &str,
        ) -> Result<TransferResponse, BackendError> {
            let response = self
                .inner
                .transfer_institution(student_id, destination_institution_id, rule_code)
                .await?;
            self.transferred.store(true, Ordering::SeqCst);
            Ok(response)
        }
    }

    fn avery() -> CurrentUser {
        CurrentUser {
            id: "st-avery".to_string(),
            name: "Avery Lee".to_string(),
            email: "avery.lee@example.com".to_string(),
            role: "student".to_string(),
            institution_id: Some("inst-001".to_string()),
            institution_name: Some("Colegio San Martin".to_string()),
        }
    }

    #[tokio::test]
    async fn transfer_updates_user_from_refreshed_profile() {
        let backend = MemoryBackend::new(snapshot::seed());
        let coordinator = TransferEquivalencyCoordinator::new(&backend);
        let user = avery();

        let outcome = coordinator
            .coordinate_transfer(&user, "st-avery", "inst-002", "AR_TO_US")
            .await
            .unwrap();

        assert_eq!(outcome.user.institution_id.as_deref(), Some("inst-002"));
        assert_eq!(outcome.user.institution_name.as_deref(), Some("Escuela Tecnica"));
        assert_eq!(outcome.profile.institution_id, "inst-002");
        assert_eq!(user.institution_id.as_deref(), Some("inst-001"));
    }

    #[tokio::test]
    async fn failed_transfer_leaves_everything_untouched() {
        let backend = MemoryBackend::new(snapshot::seed());
        let before = backend.snapshot().await;
        let coordinator = TransferEquivalencyCoordinator::new(&backend);

        let err = coordinator
            .coordinate_transfer(&avery(), "st-avery", "inst-404", "AR_TO_US")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoreError::Upstream(BackendError::NotFound { kind: "institution", .. })
        ));
        assert_eq!(backend.snapshot().await, before);
    }

    #[tokio::test]
    async fn other_students_do_not_touch_the_signed_in_user() {
        let mut seeded = snapshot::seed();
        let mut other = seeded.students[0].clone();
        other.id = "st-jules".to_string();
        seeded.students.push(other);
        let backend = MemoryBackend::new(seeded);
        let coordinator = TransferEquivalencyCoordinator::new(&backend);

        let outcome = coordinator
            .coordinate_transfer(&avery(), "st-jules", "inst-002", "AR_TO_US")
            .await
            .unwrap();

        assert_eq!(outcome.user, avery());
        assert_eq!(outcome.total_homologated, 0);
        assert_eq!(outcome.profile.institution_id, "inst-002");
    }

    #[tokio::test]
    async fn committed_transfer_survives_failed_refresh() {
        let backend = ReadsFailAfterTransfer::new(MemoryBackend::new(snapshot::seed()));
        let coordinator = TransferEquivalencyCoordinator::new(&backend);

        let outcome = coordinator
            .coordinate_transfer(&avery(), "st-avery", "inst-002", "AR_TO_US")
            .await
            .unwrap();

        assert!(!outcome.is_refreshed());
        assert_eq!(outcome.homologated().count(), 0);
        assert_eq!(outcome.total_homologated, 3);
        assert_eq!(outcome.profile.institution_id, "inst-002");
        assert_eq!(outcome.user.institution_id.as_deref(), Some("inst-002"));
        assert_eq!(outcome.user.institution_name.as_deref(), Some("Escuela Tecnica"));

        let remote = backend.inner.fetch_profile("st-avery").await.unwrap();
        assert_eq!(remote.institution_id, "inst-002");
    }

    #[tokio::test]
    async fn second_transfer_reports_only_its_own_homologations() {
        let backend = MemoryBackend::new(snapshot::seed());
        let coordinator = TransferEquivalencyCoordinator::new(&backend);

        let first = coordinator
            .coordinate_transfer(&avery(), "st-avery", "inst-002", "AR_TO_US")
            .await
            .unwrap();
        assert_eq!(first.total_homologated, 3);

        let second = coordinator
            .coordinate_transfer(&first.user, "st-avery", "inst-001", "AR_TO_US")
            .await
            .unwrap();

        assert_eq!(second.total_homologated, 0);
        assert_eq!(second.homologated().count(), 3);
        assert_eq!(second.user.institution_id.as_deref(), Some("inst-001"));
    }
}
