use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::config::ValidatorConfig;
use crate::error::Result;
use crate::types::{severity_count, CatalogRecord, Issue, IssueCategory, Severity};

static DIVISION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}$").unwrap());
static TWO_GROUP_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2} \d{2}$").unwrap());
static THREE_GROUP_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2} \d{2} \d{2}$").unwrap());

/// Characters that indicate the extraction mangled the encoding.
const REPLACEMENT_CHARS: [char; 2] = ['\u{fffd}', '\0'];

/// Result of the structural validation stage.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    /// 0-100
    pub confidence_score: f64,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub stats: ValidationStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationStats {
    pub total_records: usize,
    pub two_group_codes: usize,
    pub three_group_codes: usize,
    pub duplicates_found: usize,
    pub encoding_issues: usize,
}

/// First-pass acceptance gate over a record batch.
pub trait StructuralCheck {
    fn validate(&self, batch: &[CatalogRecord]) -> Result<ValidationReport>;
}

/// Default structural validator.
///
/// Reports facts only: schema, format, division-prefix consistency,
/// title completeness, encoding integrity, and duplicates. Whether those
/// facts fail the run is the orchestrator's call.
pub struct BatchValidator {
    config: ValidatorConfig,
}

impl BatchValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    fn check_schema(&self, batch: &[CatalogRecord], errors: &mut Vec<Issue>) {
        for (idx, record) in batch.iter().enumerate() {
            let line = idx + 1;

            for (field, value) in [("division", &record.division), ("code", &record.code)] {
                if value.trim().is_empty() {
                    errors.push(
                        Issue::new(
                            Severity::Critical,
                            IssueCategory::Schema,
                            format!("required field \"{field}\" is empty"),
                        )
                        .at_line(line),
                    );
                } else if value.trim() != value.as_str() || value.chars().any(char::is_control) {
                    errors.push(
                        Issue::new(
                            Severity::High,
                            IssueCategory::Schema,
                            format!("field \"{field}\" is not a normalized string: {value:?}"),
                        )
                        .at_line(line)
                        .for_code(&record.code),
                    );
                }
            }
        }
    }

    fn check_format(
        &self,
        batch: &[CatalogRecord],
        errors: &mut Vec<Issue>,
        stats: &mut ValidationStats,
    ) {
        for (idx, record) in batch.iter().enumerate() {
            let line = idx + 1;

            // Blank fields already hold a CRITICAL from the schema check.
            if !record.division.trim().is_empty() && !DIVISION_PATTERN.is_match(&record.division) {
                errors.push(
                    Issue::new(
                        Severity::Critical,
                        IssueCategory::Format,
                        format!(
                            "invalid division format: \"{}\" (must be 2 digits)",
                            record.division
                        ),
                    )
                    .at_line(line)
                    .for_code(&record.code),
                );
            }

            if record.code.trim().is_empty() {
                continue;
            }
            let two_group = TWO_GROUP_PATTERN.is_match(&record.code);
            let three_group = THREE_GROUP_PATTERN.is_match(&record.code);

            if two_group && !self.config.allow_two_group_codes {
                errors.push(
                    Issue::new(
                        Severity::High,
                        IssueCategory::Format,
                        format!("2-group codes are not permitted: \"{}\"", record.code),
                    )
                    .at_line(line)
                    .for_code(&record.code),
                );
            } else if three_group && !self.config.allow_three_group_codes {
                errors.push(
                    Issue::new(
                        Severity::High,
                        IssueCategory::Format,
                        format!("3-group codes are not permitted: \"{}\"", record.code),
                    )
                    .at_line(line)
                    .for_code(&record.code),
                );
            } else if !two_group && !three_group {
                errors.push(
                    Issue::new(
                        Severity::Critical,
                        IssueCategory::Format,
                        format!(
                            "invalid code format: \"{}\" (must be \"XX XX\" or \"XX XX XX\")",
                            record.code
                        ),
                    )
                    .at_line(line)
                    .for_code(&record.code),
                );
            }

            if two_group {
                stats.two_group_codes += 1;
            } else if three_group {
                stats.three_group_codes += 1;
            }
        }
    }

    fn check_division_consistency(&self, batch: &[CatalogRecord], errors: &mut Vec<Issue>) {
        for (idx, record) in batch.iter().enumerate() {
            if record.division.trim().is_empty() || record.code.trim().is_empty() {
                continue;
            }

            let digits = record.compact_code();
            let prefix: String = digits.chars().take(2).collect();
            if prefix.chars().count() < 2 {
                continue;
            }

            if prefix != record.division {
                errors.push(
                    Issue::new(
                        Severity::High,
                        IssueCategory::Consistency,
                        format!(
                            "division \"{}\" does not match code prefix \"{}\" in code \"{}\"",
                            record.division, prefix, record.code
                        ),
                    )
                    .at_line(idx + 1)
                    .for_code(&record.code),
                );
            }
        }
    }

    fn check_completeness(&self, batch: &[CatalogRecord], errors: &mut Vec<Issue>) {
        for (idx, record) in batch.iter().enumerate() {
            let line = idx + 1;
            let title = record.title.trim();

            if title.is_empty() {
                errors.push(
                    Issue::new(Severity::Critical, IssueCategory::Completeness, "title is empty")
                        .at_line(line)
                        .for_code(&record.code),
                );
                continue;
            }

            let length = title.chars().count();
            if length < self.config.min_title_length {
                errors.push(
                    Issue::new(
                        Severity::High,
                        IssueCategory::Completeness,
                        format!("title suspiciously short: \"{title}\" ({length} chars)"),
                    )
                    .at_line(line)
                    .for_code(&record.code),
                );
            }

            let full_length = record.title_len();
            if full_length > self.config.max_title_length {
                let preview: String = record.title.chars().take(100).collect();
                errors.push(
                    Issue::new(
                        Severity::Medium,
                        IssueCategory::Completeness,
                        format!(
                            "title suspiciously long: {} chars (max: {})",
                            full_length, self.config.max_title_length
                        ),
                    )
                    .at_line(line)
                    .for_code(&record.code)
                    .with_details(json!({ "title_preview": format!("{preview}...") })),
                );
            }

            for marker in &self.config.truncation_markers {
                if record.title.contains(marker) {
                    errors.push(
                        Issue::new(
                            Severity::High,
                            IssueCategory::Completeness,
                            format!(
                                "possible title truncation: \"{}\" found in \"{}\"",
                                marker, record.title
                            ),
                        )
                        .at_line(line)
                        .for_code(&record.code),
                    );
                    break;
                }
            }
        }
    }

    fn check_encoding(
        &self,
        batch: &[CatalogRecord],
        warnings: &mut Vec<Issue>,
        stats: &mut ValidationStats,
    ) {
        for (idx, record) in batch.iter().enumerate() {
            if let Some(bad) = REPLACEMENT_CHARS.iter().find(|c| record.title.contains(**c)) {
                warnings.push(
                    Issue::new(
                        Severity::Medium,
                        IssueCategory::Encoding,
                        format!("possible encoding issue: {bad:?} in title"),
                    )
                    .at_line(idx + 1)
                    .for_code(&record.code)
                    .with_details(json!({ "title": record.title })),
                );
                stats.encoding_issues += 1;
            }
        }
    }

    fn detect_duplicates(
        &self,
        batch: &[CatalogRecord],
        errors: &mut Vec<Issue>,
        stats: &mut ValidationStats,
    ) {
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (idx, record) in batch.iter().enumerate() {
            let line = idx + 1;
            let key = format!("{}-{}", record.division, record.code);

            match seen.get(&key) {
                Some(&first) => {
                    errors.push(
                        Issue::new(
                            Severity::High,
                            IssueCategory::Duplicate,
                            format!("duplicate code detected: {key}"),
                        )
                        .at_line(line)
                        .for_code(&record.code)
                        .with_details(json!({
                            "first_occurrence": first,
                            "duplicate_occurrence": line,
                        })),
                    );
                    stats.duplicates_found += 1;
                }
                None => {
                    seen.insert(key, line);
                }
            }
        }
    }

    fn confidence(critical: usize, high: usize, medium: usize, warnings: usize) -> f64 {
        let score = 100.0
            - critical as f64 * 50.0
            - high as f64 * 10.0
            - medium as f64 * 2.0
            - warnings as f64 * 0.5;
        score.clamp(0.0, 100.0)
    }
}

impl StructuralCheck for BatchValidator {
    fn validate(&self, batch: &[CatalogRecord]) -> Result<ValidationReport> {
        info!("starting structural validation of {} records", batch.len());

        let mut stats = ValidationStats {
            total_records: batch.len(),
            ..ValidationStats::default()
        };

        if batch.is_empty() {
            let errors = vec![Issue::new(
                Severity::Critical,
                IssueCategory::Schema,
                "no records provided for validation",
            )];
            return Ok(ValidationReport {
                passed: false,
                confidence_score: 0.0,
                errors,
                warnings: Vec::new(),
                stats,
            });
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        self.check_schema(batch, &mut errors);
        self.check_format(batch, &mut errors, &mut stats);
        self.check_division_consistency(batch, &mut errors);
        self.check_completeness(batch, &mut errors);
        self.check_encoding(batch, &mut warnings, &mut stats);
        self.detect_duplicates(batch, &mut errors, &mut stats);

        let critical = severity_count(&errors, Severity::Critical);
        let high = severity_count(&errors, Severity::High);
        let medium = severity_count(&errors, Severity::Medium);

        let confidence_score = Self::confidence(critical, high, medium, warnings.len());
        let passed = critical == 0 && high == 0;

        info!(
            "structural validation {}: confidence {:.1}% | {} errors, {} warnings",
            if passed { "passed" } else { "failed" },
            confidence_score,
            errors.len(),
            warnings.len()
        );

        Ok(ValidationReport {
            passed,
            confidence_score,
            errors,
            warnings,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> BatchValidator {
        BatchValidator::new(ValidatorConfig::default())
    }

    fn record(division: &str, code: &str, title: &str) -> CatalogRecord {
        CatalogRecord::new(division, code, title)
    }

    #[test]
    fn empty_batch_is_critical_with_zero_confidence() {
        let report = validator().validate(&[]).unwrap();
        assert!(!report.passed);
        assert_eq!(report.confidence_score, 0.0);
        assert_eq!(severity_count(&report.errors, Severity::Critical), 1);
    }

    #[test]
    fn clean_batch_passes_at_full_confidence() {
        let batch = vec![
            record("03", "03 30", "Cast-In-Place Concrete"),
            record("03", "03 30 53", "Miscellaneous Cast-In-Place Concrete"),
        ];
        let report = validator().validate(&batch).unwrap();
        assert!(report.passed);
        assert_eq!(report.confidence_score, 100.0);
        assert!(report.errors.is_empty());
        assert_eq!(report.stats.two_group_codes, 1);
        assert_eq!(report.stats.three_group_codes, 1);
    }

    #[test]
    fn division_mismatch_yields_one_high_consistency_issue_per_record() {
        let batch = vec![
            record("02", "01 58", "Project Identification"),
            record("03", "03 30", "Cast-In-Place Concrete"),
            record("05", "04 20", "Unit Masonry"),
        ];
        let report = validator().validate(&batch).unwrap();
        let consistency: Vec<&Issue> = report
            .errors
            .iter()
            .filter(|i| i.category == IssueCategory::Consistency)
            .collect();
        assert_eq!(consistency.len(), 2);
        assert!(consistency
            .iter()
            .all(|i| i.severity == Severity::High));
        assert!(consistency[0].message.contains("\"02\""));
        assert!(consistency[0].message.contains("\"01\""));
    }

    #[test]
    fn duplicates_flag_every_occurrence_after_the_first() {
        let batch = vec![
            record("03", "03 30", "Cast-In-Place Concrete"),
            record("03", "03 30", "Cast-In-Place Concrete"),
            record("03", "03 30", "Cast-In-Place Concrete"),
        ];
        let report = validator().validate(&batch).unwrap();
        let duplicates: Vec<&Issue> = report
            .errors
            .iter()
            .filter(|i| i.category == IssueCategory::Duplicate)
            .collect();
        assert_eq!(duplicates.len(), 2);
        assert_eq!(report.stats.duplicates_found, 2);
        for (issue, line) in duplicates.iter().zip([2usize, 3]) {
            assert_eq!(issue.line_number, Some(line));
            assert_eq!(
                issue.details.as_ref().unwrap()["first_occurrence"],
                serde_json::json!(1)
            );
        }
    }

    #[test]
    fn malformed_code_is_critical() {
        let batch = vec![record("03", "3-30", "Cast-In-Place Concrete")];
        let report = validator().validate(&batch).unwrap();
        assert!(report
            .errors
            .iter()
            .any(|i| i.category == IssueCategory::Format && i.severity == Severity::Critical));
    }

    #[test]
    fn disallowed_group_count_is_high_not_critical() {
        let config = ValidatorConfig {
            allow_two_group_codes: false,
            ..ValidatorConfig::default()
        };
        let batch = vec![record("03", "03 30", "Cast-In-Place Concrete")];
        let report = BatchValidator::new(config).validate(&batch).unwrap();
        let format_issues: Vec<&Issue> = report
            .errors
            .iter()
            .filter(|i| i.category == IssueCategory::Format)
            .collect();
        assert_eq!(format_issues.len(), 1);
        assert_eq!(format_issues[0].severity, Severity::High);
    }

    #[test]
    fn title_length_band_and_truncation_markers() {
        let long_title = "x".repeat(201);
        let batch = vec![
            record("03", "03 10", "C"),
            record("03", "03 20", &long_title),
            record("03", "03 40", "Concrete Formwork for Constructio"),
        ];
        let report = validator().validate(&batch).unwrap();
        assert!(report.errors.iter().any(|i| {
            i.category == IssueCategory::Completeness
                && i.severity == Severity::High
                && i.line_number == Some(1)
        }));
        assert!(report.errors.iter().any(|i| {
            i.category == IssueCategory::Completeness
                && i.severity == Severity::Medium
                && i.line_number == Some(2)
        }));
        assert!(report.errors.iter().any(|i| {
            i.category == IssueCategory::Completeness
                && i.severity == Severity::High
                && i.line_number == Some(3)
                && i.message.contains("truncation")
        }));
    }

    #[test]
    fn encoding_problems_are_warnings_not_errors() {
        let batch = vec![record("03", "03 30", "Cast\u{fffd}In-Place Concrete")];
        let report = validator().validate(&batch).unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].severity, Severity::Medium);
        assert_eq!(report.stats.encoding_issues, 1);
        assert!(report.passed);
        assert!((report.confidence_score - 99.5).abs() < 1e-9);
    }

    #[test]
    fn confidence_deductions_follow_the_formula() {
        // One empty title (critical) and one short title (high).
        let batch = vec![
            record("03", "03 10", ""),
            record("03", "03 20", "C"),
            record("03", "03 30", "Cast-In-Place Concrete"),
        ];
        let report = validator().validate(&batch).unwrap();
        assert!((report.confidence_score - 40.0).abs() < 1e-9);
        assert!(!report.passed);
    }

    #[test]
    fn confidence_never_goes_below_zero() {
        let batch: Vec<CatalogRecord> =
            (0..5).map(|_| record("03", "bad code", "")).collect();
        let report = validator().validate(&batch).unwrap();
        assert_eq!(report.confidence_score, 0.0);
    }
}
