use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AssessmentType, ConversionRule, GradeValue, HistoryRecord, Institution, LedgerRecord,
    OriginalValue, RuleMapping, StudentProfile, SubjectGrades, SubjectStatus,
};

/// Everything the offline collaborator serves, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub institutions: Vec<Institution>,
    #[serde(default)]
    pub students: Vec<StudentProfile>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<HistoryRecord>>,
    #[serde(default)]
    pub ledger: Vec<LedgerRecord>,
    #[serde(default)]
    pub rules: Vec<ConversionRule>,
}

pub fn load(path: &Path) -> anyhow::Result<Snapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let snapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
    Ok(snapshot)
}

pub fn save(path: &Path, snapshot: &Snapshot) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, raw)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    Ok(())
}

/// Appends ledger records from a CSV file with the columns
/// `student_id,subject_id,type,grade` and an optional `id`. Rows whose id is
/// already present are skipped. Returns the number of records added.
pub fn import_ledger_csv(snapshot: &mut Snapshot, csv_path: &Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        subject_id: String,
        #[serde(rename = "type")]
        kind: AssessmentType,
        grade: String,
        id: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let id = row
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if snapshot.ledger.iter().any(|record| record.id == id) {
            continue;
        }

        let grade = GradeValue::Letter(row.grade.trim().to_string());
        let grade = match grade.as_number() {
            Some(value) => GradeValue::Numeric(value),
            None => grade,
        };

        snapshot.ledger.push(LedgerRecord {
            id,
            student_id: row.student_id,
            subject_id: row.subject_id,
            original_value: OriginalValue {
                kind: row.kind,
                grade,
            },
            created_at: Utc::now(),
            conversions: Vec::new(),
        });
        inserted += 1;
    }

    Ok(inserted)
}

fn mapping(entries: &[(GradeValue, GradeValue)]) -> Vec<RuleMapping> {
    entries
        .iter()
        .map(|(source_value, destination_value)| RuleMapping {
            source_value: source_value.clone(),
            destination_value: destination_value.clone(),
        })
        .collect()
}

fn subject(id: &str, name: &str, code: &str, grades: SubjectGrades, status: SubjectStatus) -> HistoryRecord {
    HistoryRecord {
        subject_id: id.to_string(),
        subject_name: name.to_string(),
        subject_code: code.to_string(),
        grades,
        status,
        year: 2025,
        equivalency: None,
    }
}

/// Realistic demo data: two institutions, one student with a mixed record and
/// two reference rules.
pub fn seed() -> Snapshot {
    let student_id = "st-avery";
    let created_at = Utc
        .with_ymd_and_hms(2025, 12, 5, 14, 30, 0)
        .single()
        .unwrap_or_else(Utc::now);

    let history = vec![
        subject(
            "sub-mat",
            "Matematica",
            "MAT-001",
            SubjectGrades {
                first_partial: Some(GradeValue::Numeric(8.0)),
                second_partial: Some(GradeValue::Numeric(9.0)),
                final_grade: Some(GradeValue::Numeric(9.0)),
                previous: None,
            },
            SubjectStatus::Approved,
        ),
        subject(
            "sub-fis",
            "Fisica",
            "FIS-001",
            SubjectGrades {
                previous: Some(GradeValue::Numeric(6.5)),
                ..SubjectGrades::default()
            },
            SubjectStatus::Approved,
        ),
        subject(
            "sub-len",
            "Lengua",
            "LEN-001",
            SubjectGrades {
                final_grade: Some(GradeValue::Numeric(8.0)),
                ..SubjectGrades::default()
            },
            SubjectStatus::Approved,
        ),
        subject(
            "sub-qui",
            "Quimica",
            "QUI-001",
            SubjectGrades {
                first_partial: Some(GradeValue::Numeric(5.0)),
                ..SubjectGrades::default()
            },
            SubjectStatus::Enrolled,
        ),
    ];

    let ledger = vec![
        LedgerRecord {
            id: "cal-mat-final".to_string(),
            student_id: student_id.to_string(),
            subject_id: "sub-mat".to_string(),
            original_value: OriginalValue {
                kind: AssessmentType::Final,
                grade: GradeValue::Numeric(9.0),
            },
            created_at,
            conversions: Vec::new(),
        },
        LedgerRecord {
            id: "cal-len-final".to_string(),
            student_id: student_id.to_string(),
            subject_id: "sub-len".to_string(),
            original_value: OriginalValue {
                kind: AssessmentType::Final,
                grade: GradeValue::Numeric(8.0),
            },
            created_at,
            conversions: Vec::new(),
        },
    ];

    let rules = vec![
        ConversionRule {
            code: "AR_TO_US".to_string(),
            name: "Argentina 1-10 to US letters".to_string(),
            source_system: Some("AR".to_string()),
            destination_system: Some("US".to_string()),
            version: Some("1.0".to_string()),
            mapping: mapping(&[
                (10.0.into(), "A".into()),
                (9.0.into(), "A".into()),
                (8.0.into(), "B".into()),
                (7.0.into(), "C".into()),
                (6.5.into(), "D".into()),
                (6.0.into(), "D".into()),
                (4.0.into(), "D".into()),
            ]),
        },
        ConversionRule {
            code: "AR_TO_GPA".to_string(),
            name: "Argentina 1-10 to 0-4 scale".to_string(),
            source_system: Some("AR".to_string()),
            destination_system: Some("GPA".to_string()),
            version: Some("1.0".to_string()),
            mapping: mapping(&[
                (10.0.into(), 4.0.into()),
                (9.0.into(), 3.6.into()),
                (8.0.into(), 3.2.into()),
                (7.0.into(), 2.8.into()),
                (6.0.into(), 2.4.into()),
            ]),
        },
    ];

    Snapshot {
        institutions: vec![
            Institution {
                id: "inst-001".to_string(),
                name: "Colegio San Martin".to_string(),
                city: Some("CABA".to_string()),
            },
            Institution {
                id: "inst-002".to_string(),
                name: "Escuela Tecnica".to_string(),
                city: Some("La Plata".to_string()),
            },
        ],
        students: vec![StudentProfile {
            id: student_id.to_string(),
            name: "Avery Lee".to_string(),
            email: "avery.lee@example.com".to_string(),
            institution_id: "inst-001".to_string(),
            institution_name: "Colegio San Martin".to_string(),
        }],
        history: BTreeMap::from([(student_id.to_string(), history)]),
        ledger,
        rules,
    }
}
