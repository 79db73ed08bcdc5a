use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::models::{ConversionRule, ConvertedValue, GradeValue, RuleMapping};

/// Numeric entries match grades strictly closer than this.
pub const MATCH_TOLERANCE: f64 = 0.05;

/// Rendered in place of a converted value when no entry matches.
pub const NO_MATCH_LABEL: &str = "N/A";

/// Rejects rules carrying entries no grade could sensibly be compared with:
/// blank strings or non-finite numbers on either side.
pub fn validate_rule(rule: &ConversionRule) -> CoreResult<()> {
    for (index, entry) in rule.mapping.iter().enumerate() {
        for (side, value) in [
            ("source", &entry.source_value),
            ("destination", &entry.destination_value),
        ] {
            let problem = match value {
                GradeValue::Numeric(number) if !number.is_finite() => Some("is not a finite number"),
                GradeValue::Letter(text) if text.trim().is_empty() => Some("is blank"),
                _ => None,
            };
            if let Some(problem) = problem {
                return Err(CoreError::MalformedRule {
                    rule_code: rule.code.clone(),
                    reason: format!("mapping entry {index} {side} value {problem}"),
                });
            }
        }
    }
    Ok(())
}

pub fn entry_matches(entry: &RuleMapping, grade: &GradeValue) -> bool {
    match (entry.source_value.as_number(), grade.as_number()) {
        (Some(source), Some(value)) => (source - value).abs() < MATCH_TOLERANCE,
        _ => {
            let source = entry.source_value.to_string();
            let value = grade.to_string();
            source.trim().to_lowercase() == value.trim().to_lowercase()
        }
    }
}

/// Finds the first mapping entry, in rule order, that matches `grade`.
/// Assumes `rule` already passed [`validate_rule`].
pub fn find_match(rule: &ConversionRule, grade: &GradeValue) -> ConvertedValue {
    let converted = rule
        .mapping
        .iter()
        .find(|entry| entry_matches(entry, grade))
        .map(|entry| ConvertedValue::Matched(entry.destination_value.clone()))
        .unwrap_or(ConvertedValue::NoMatch);

    debug!(rule = %rule.code, grade = %grade, matched = ?converted.matched(), "matched grade against rule");
    converted
}

pub fn match_grade(rule: &ConversionRule, grade: &GradeValue) -> CoreResult<ConvertedValue> {
    validate_rule(rule)?;
    Ok(find_match(rule, grade))
}
