use std::fmt::Write;

use crate::conversion::{format_converted, format_grade};
use crate::models::{
    ConversionRule, ConvertedGrade, ConvertedValue, StudentProfile, SubjectStatus, PASSING_GRADE,
};

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub status: SubjectStatus,
    pub count: usize,
    pub avg_grade: f64,
}

pub fn summarize_by_status(grades: &[ConvertedGrade]) -> Vec<StatusSummary> {
    let mut map: std::collections::HashMap<SubjectStatus, (usize, f64)> =
        std::collections::HashMap::new();

    for grade in grades {
        let entry = map.entry(grade.reconciled.status).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += grade.reconciled.grade_value.normalized_score();
    }

    let mut summaries: Vec<StatusSummary> = map
        .into_iter()
        .map(|(status, (count, total))| StatusSummary {
            status,
            count,
            avg_grade: if count == 0 { 0.0 } else { total / count as f64 },
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.status.as_str().cmp(b.status.as_str()))
    });
    summaries
}

pub fn build_report(student: &StudentProfile, rule: &ConversionRule, grades: &[ConvertedGrade]) -> String {
    let summaries = summarize_by_status(grades);
    let mut output = String::new();

    let _ = writeln!(output, "# Grade Conversion Report");
    let _ = writeln!(
        output,
        "Generated for {} ({}, {}) using {} ({})",
        student.name, student.email, student.institution_name, rule.name, rule.code
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No grades to convert.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} subjects (avg grade {:.1})",
                summary.status, summary.count, summary.avg_grade
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Converted Grades");

    if grades.is_empty() {
        let _ = writeln!(output, "No grades to convert.");
    } else {
        let _ = writeln!(output, "| Code | Subject | Type | Original | Converted | Ledger record |");
        let _ = writeln!(output, "| --- | --- | --- | --- | --- | --- |");
        for grade in grades {
            let row = &grade.reconciled;
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} |",
                row.subject_code,
                row.subject_name,
                row.grade_type,
                format_grade(&row.grade_value),
                format_converted(&grade.converted_value),
                row.ledger_record_id.as_deref().unwrap_or("missing")
            );
        }
    }

    let equivalencies: Vec<&ConvertedGrade> = grades
        .iter()
        .filter(|grade| grade.reconciled.is_homologated())
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Equivalencies");

    if equivalencies.is_empty() {
        let _ = writeln!(output, "No subjects approved by equivalency.");
    } else {
        for grade in equivalencies {
            if let Some(equivalency) = &grade.reconciled.equivalency {
                let _ = writeln!(
                    output,
                    "- {} from {} (original {}) via {} on {}",
                    grade.reconciled.subject_name,
                    equivalency.origin_subject_name,
                    format_grade(&equivalency.original_grade),
                    equivalency.conversion_method,
                    equivalency.conversion_date.date_naive()
                );
            }
        }
    }

    let unmatched = grades
        .iter()
        .filter(|grade| grade.converted_value == ConvertedValue::NoMatch)
        .count();
    let missing_records = grades
        .iter()
        .filter(|grade| !grade.reconciled.is_persistable())
        .count();
    let passing = grades
        .iter()
        .filter(|grade| grade.reconciled.grade_value.normalized_score() >= PASSING_GRADE)
        .count();
    let numeric: Vec<f64> = grades
        .iter()
        .filter_map(|grade| grade.reconciled.grade_value.as_number())
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Passing grades: {} of {}", passing, grades.len());
    let _ = writeln!(output, "- Without equivalence (N/A): {}", unmatched);
    let _ = writeln!(output, "- Missing ledger records: {}", missing_records);
    if numeric.is_empty() {
        let _ = writeln!(output, "- Average grade: N/A");
    } else {
        let average = numeric.iter().sum::<f64>() / numeric.len() as f64;
        let _ = writeln!(output, "- Average grade: {:.2}", average);
    }

    output
}
