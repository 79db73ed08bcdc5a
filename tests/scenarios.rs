use std::collections::BTreeMap;

use chrono::Utc;
use grade_equivalency::backend::{fetch_reconciled, AcademicBackend};
use grade_equivalency::conversion::{format_converted, preview, ConversionService};
use grade_equivalency::memory::MemoryBackend;
use grade_equivalency::models::{
    AssessmentType, ConversionRule, ConvertedValue, CurrentUser, GradeValue, HistoryRecord,
    Institution, LedgerRecord, OriginalValue, RuleMapping, StudentProfile, SubjectGrades,
    SubjectStatus,
};
use grade_equivalency::snapshot::Snapshot;
use grade_equivalency::{reconcile, CoreError, TransferEquivalencyCoordinator};

const STUDENT: &str = "st-1";

fn ar_to_us() -> ConversionRule {
    let entries: Vec<(f64, &str)> = vec![
        (10.0, "A"),
        (9.0, "A"),
        (8.0, "B"),
        (7.0, "C"),
        (6.0, "D"),
        (4.0, "D"),
    ];
    ConversionRule {
        code: "AR_TO_US".to_string(),
        name: "Argentina to US".to_string(),
        source_system: Some("AR".to_string()),
        destination_system: Some("US".to_string()),
        version: None,
        mapping: entries
            .into_iter()
            .map(|(source, destination)| RuleMapping {
                source_value: GradeValue::Numeric(source),
                destination_value: GradeValue::Letter(destination.to_string()),
            })
            .collect(),
    }
}

fn history(subject_id: &str, code: &str, grades: SubjectGrades, status: SubjectStatus) -> HistoryRecord {
    HistoryRecord {
        subject_id: subject_id.to_string(),
        subject_name: format!("Subject {code}"),
        subject_code: code.to_string(),
        grades,
        status,
        year: 2025,
        equivalency: None,
    }
}

fn final_grade(value: f64) -> SubjectGrades {
    SubjectGrades {
        final_grade: Some(GradeValue::Numeric(value)),
        ..SubjectGrades::default()
    }
}

fn ledger(id: &str, subject_id: &str, kind: AssessmentType, grade: f64) -> LedgerRecord {
    LedgerRecord {
        id: id.to_string(),
        student_id: STUDENT.to_string(),
        subject_id: subject_id.to_string(),
        original_value: OriginalValue {
            kind,
            grade: GradeValue::Numeric(grade),
        },
        created_at: Utc::now(),
        conversions: Vec::new(),
    }
}

fn backend(records: Vec<HistoryRecord>, entries: Vec<LedgerRecord>) -> MemoryBackend {
    MemoryBackend::new(Snapshot {
        institutions: vec![
            Institution {
                id: "inst-a".to_string(),
                name: "Colegio San Martin".to_string(),
                city: None,
            },
            Institution {
                id: "inst-b".to_string(),
                name: "Liceo Municipal".to_string(),
                city: Some("Quilmes".to_string()),
            },
        ],
        students: vec![StudentProfile {
            id: STUDENT.to_string(),
            name: "Kiara Patel".to_string(),
            email: "kiara.patel@example.com".to_string(),
            institution_id: "inst-a".to_string(),
            institution_name: "Colegio San Martin".to_string(),
        }],
        history: BTreeMap::from([(STUDENT.to_string(), records)]),
        ledger: entries,
        rules: vec![ar_to_us()],
    })
}

#[tokio::test]
async fn final_grade_with_ledger_record_converts_and_applies() {
    let backend = backend(
        vec![history("mat", "MAT-001", final_grade(9.0), SubjectStatus::Approved)],
        vec![ledger("cal-mat", "mat", AssessmentType::Final, 9.0)],
    );

    let grades = fetch_reconciled(&backend, STUDENT).await.unwrap();
    let converted = preview(&grades, &ar_to_us()).unwrap();

    assert_eq!(converted.len(), 1);
    assert_eq!(converted[0].converted_value, ConvertedValue::Matched("A".into()));
    assert_eq!(converted[0].reconciled.ledger_record_id.as_deref(), Some("cal-mat"));

    let applied = ConversionService::new(&backend).apply(&converted[0]).await.unwrap();
    assert_eq!(applied.persisted_value, GradeValue::Letter("A".to_string()));
    assert!(applied.matches_preview());
}

#[tokio::test]
async fn previous_grade_without_ledger_record_is_not_persistable() {
    let backend = backend(
        vec![history(
            "fis",
            "FIS-001",
            SubjectGrades {
                previous: Some(GradeValue::Numeric(6.5)),
                ..SubjectGrades::default()
            },
            SubjectStatus::Approved,
        )],
        Vec::new(),
    );

    let grades = fetch_reconciled(&backend, STUDENT).await.unwrap();
    let converted = preview(&grades, &ar_to_us()).unwrap();

    assert_eq!(converted[0].reconciled.grade_type, AssessmentType::Previous);
    assert_eq!(converted[0].reconciled.ledger_record_id, None);
    assert_eq!(format_converted(&converted[0].converted_value), "N/A");

    let err = ConversionService::new(&backend)
        .apply(&converted[0])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotPersistable { .. }));
    assert!(backend.fetch_ledger(STUDENT).await.unwrap().is_empty());
}

#[test]
fn final_typed_ledger_record_wins_over_partial() {
    let records = vec![
        history("mat", "MAT-001", final_grade(8.0), SubjectStatus::Approved),
        history("mat", "MAT-001", final_grade(9.0), SubjectStatus::Approved),
    ];
    let entries = vec![
        ledger("cal-partial", "mat", AssessmentType::Partial1, 7.0),
        ledger("cal-final", "mat", AssessmentType::Final, 9.0),
    ];

    let grades = reconcile(&records, &entries);

    assert_eq!(grades.len(), 2);
    for grade in grades.iter() {
        assert_eq!(grade.ledger_record_id.as_deref(), Some("cal-final"));
    }
    assert_eq!(grades, reconcile(&records, &entries));
}

#[tokio::test]
async fn transfer_marks_homologated_subjects_together() {
    let backend = backend(
        vec![
            history("mat", "MAT-001", final_grade(9.0), SubjectStatus::Approved),
            history("len", "LEN-001", final_grade(8.0), SubjectStatus::Approved),
            history("art", "ART-001", final_grade(5.0), SubjectStatus::Approved),
            history("qui", "QUI-001", final_grade(2.0), SubjectStatus::Failed),
        ],
        vec![ledger("cal-mat", "mat", AssessmentType::Final, 9.0)],
    );
    let user = CurrentUser {
        id: STUDENT.to_string(),
        name: "Kiara Patel".to_string(),
        email: "kiara.patel@example.com".to_string(),
        role: "student".to_string(),
        institution_id: Some("inst-a".to_string()),
        institution_name: Some("Colegio San Martin".to_string()),
    };

    let before = fetch_reconciled(&backend, STUDENT).await.unwrap();
    assert!(before
        .iter()
        .all(|grade| grade.status != SubjectStatus::ApprovedByEquivalency));

    let outcome = TransferEquivalencyCoordinator::new(&backend)
        .coordinate_transfer(&user, STUDENT, "inst-b", "AR_TO_US")
        .await
        .unwrap();

    assert_eq!(outcome.total_homologated, 2);
    let homologated: Vec<_> = outcome.homologated().collect();
    assert_eq!(homologated.len(), 2);
    let codes: Vec<&str> = homologated
        .iter()
        .map(|grade| grade.subject_code.as_str())
        .collect();
    assert_eq!(codes, vec!["MAT-001", "LEN-001"]);

    assert!(outcome.is_refreshed());
    for grade in outcome.record.as_deref().unwrap_or_default() {
        match &grade.equivalency {
            Some(equivalency) => {
                assert_eq!(grade.status, SubjectStatus::ApprovedByEquivalency);
                assert_eq!(equivalency.conversion_method, "AR_TO_US");
                assert_eq!(equivalency.origin_subject_name, grade.subject_name);
            }
            None => assert_ne!(grade.status, SubjectStatus::ApprovedByEquivalency),
        }
    }

    let mat = &homologated[0];
    let equivalency = mat.equivalency.as_ref().unwrap();
    assert_eq!(equivalency.original_grade, GradeValue::Numeric(9.0));
    assert_eq!(mat.grade_value, GradeValue::Letter("A".to_string()));

    assert_eq!(outcome.user.institution_id.as_deref(), Some("inst-b"));
    assert_eq!(outcome.user.institution_name.as_deref(), Some("Liceo Municipal"));
    assert_eq!(user.institution_id.as_deref(), Some("inst-a"));
}
