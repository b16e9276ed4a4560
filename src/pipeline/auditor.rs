use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::config::AuditorConfig;
use crate::error::Result;
use crate::taxonomy::DivisionTaxonomy;
use crate::types::{severity_count, Anomaly, CatalogRecord, Issue, IssueCategory, Severity};

/// Backward code jumps within a division smaller than this are tolerated
/// (hierarchical grouping reorders nearby codes).
const SEQUENCE_TOLERANCE: i64 = 10;
/// Adjacent sorted-code gaps above this are anomalous.
const LARGE_GAP: i64 = 1000;
/// Divisions with fewer records than this look incomplete.
const MIN_DIVISION_RECORDS: usize = 3;
/// Titles at most this many characters are too short to judge contextually.
const CONTEXT_MIN_TITLE_LEN: usize = 10;
/// Batches spanning more than this many divisions should contain the
/// common ones.
const BROAD_BATCH_DIVISIONS: usize = 10;

/// Result of the semantic audit stage.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub passed: bool,
    pub issues: Vec<Issue>,
    pub stats: AuditStats,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub total_records: usize,
    pub divisions_found: usize,
    pub level1_codes: usize,
    pub level2_codes: usize,
    pub sequence_breaks: usize,
    pub unknown_divisions: usize,
    pub anomalies_detected: usize,
}

/// Batch-wide consistency analysis: hierarchy, ordering, cross-reference,
/// context, and statistical anomalies.
pub trait ConsistencyAudit {
    fn audit(&self, batch: &[CatalogRecord]) -> Result<AuditReport>;
}

/// Default semantic auditor, checked against an explicit reference
/// taxonomy rather than any ambient table.
pub struct BatchAuditor {
    config: AuditorConfig,
    taxonomy: DivisionTaxonomy,
}

impl BatchAuditor {
    pub fn new(config: AuditorConfig, taxonomy: DivisionTaxonomy) -> Self {
        Self { config, taxonomy }
    }

    fn check_hierarchy(
        &self,
        batch: &[CatalogRecord],
        issues: &mut Vec<Issue>,
        stats: &mut AuditStats,
    ) {
        // division -> level1 -> (level-1 record present, level-2 codes seen)
        let mut hierarchy: BTreeMap<&str, BTreeMap<String, (bool, BTreeSet<String>)>> =
            BTreeMap::new();

        for record in batch {
            let digits = record.compact_code();
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }

            let levels = hierarchy.entry(record.division.as_str()).or_default();
            match digits.len() {
                4 => {
                    let entry = levels.entry(digits[2..4].to_string()).or_default();
                    entry.0 = true;
                    stats.level1_codes += 1;
                }
                6 => {
                    let entry = levels.entry(digits[2..4].to_string()).or_default();
                    entry.1.insert(digits[4..6].to_string());
                    stats.level2_codes += 1;
                }
                _ => {}
            }
        }

        for (division, levels) in &hierarchy {
            for (level1, (has_parent, level2_codes)) in levels {
                if !has_parent && !level2_codes.is_empty() {
                    issues.push(
                        Issue::new(
                            Severity::Medium,
                            IssueCategory::Hierarchy,
                            format!(
                                "level 2 codes without a parent level 1 record: division {division}, level {level1}"
                            ),
                        )
                        .for_code(format!("{division} {level1}"))
                        .with_details(json!({
                            "level2_codes": level2_codes.iter().collect::<Vec<_>>(),
                        })),
                    );
                }
            }
        }

        stats.divisions_found = hierarchy.len();
    }

    fn verify_sequence(
        &self,
        batch: &[CatalogRecord],
        issues: &mut Vec<Issue>,
        stats: &mut AuditStats,
    ) {
        if !self.config.require_sequence_order {
            return;
        }

        let mut prev_division: Option<&str> = None;
        let mut prev_division_value = -1i64;
        let mut prev_code_value = -1i64;

        for (idx, record) in batch.iter().enumerate() {
            let line = idx + 1;

            let division_value: Option<i64> = record.division.parse().ok();
            let code_value = record.numeric_code();

            let (Some(division_value), Some(code_value)) = (division_value, code_value) else {
                issues.push(
                    Issue::new(
                        Severity::Medium,
                        IssueCategory::Sequence,
                        format!("unable to verify sequence for code: \"{}\"", record.code),
                    )
                    .at_line(line)
                    .for_code(&record.code),
                );
                continue;
            };

            if let Some(prev) = prev_division {
                if division_value < prev_division_value {
                    issues.push(
                        Issue::new(
                            Severity::High,
                            IssueCategory::Sequence,
                            format!("division sequence break: {} -> {}", prev, record.division),
                        )
                        .at_line(line)
                        .for_code(&record.code),
                    );
                    stats.sequence_breaks += 1;
                }

                if prev == record.division && code_value < prev_code_value - SEQUENCE_TOLERANCE {
                    issues.push(
                        Issue::new(
                            Severity::Low,
                            IssueCategory::Sequence,
                            format!(
                                "possible code sequence break in division {}: {} -> {}",
                                record.division, prev_code_value, code_value
                            ),
                        )
                        .at_line(line)
                        .for_code(&record.code),
                    );
                    stats.sequence_breaks += 1;
                }
            }

            prev_division = Some(&record.division);
            prev_division_value = division_value;
            prev_code_value = code_value;
        }
    }

    fn cross_reference(
        &self,
        batch: &[CatalogRecord],
        issues: &mut Vec<Issue>,
        stats: &mut AuditStats,
    ) {
        if !self.config.check_cross_references {
            return;
        }

        let parsed: BTreeSet<&str> = batch
            .iter()
            .map(|r| r.division.as_str())
            .filter(|d| !d.is_empty())
            .collect();

        for division in &parsed {
            if !self.taxonomy.is_known(division) {
                issues.push(
                    Issue::new(
                        Severity::Medium,
                        IssueCategory::CrossReference,
                        format!("unknown division: {division} (not in the reference taxonomy)"),
                    )
                    .for_code(*division)
                    .with_details(json!({
                        "parsed_divisions": parsed.iter().collect::<Vec<_>>(),
                    })),
                );
                stats.unknown_divisions += 1;
            }
        }

        let missing: Vec<&str> = self
            .taxonomy
            .common_divisions()
            .filter(|d| !parsed.contains(d))
            .collect();
        if !missing.is_empty() && parsed.len() > BROAD_BATCH_DIVISIONS {
            issues.push(
                Issue::new(
                    Severity::Low,
                    IssueCategory::Coverage,
                    format!("common divisions not found: {}", missing.join(", ")),
                )
                .with_details(json!({
                    "note": "may be expected if the source covers a subset",
                })),
            );
        }
    }

    fn analyze_context(&self, batch: &[CatalogRecord], issues: &mut Vec<Issue>) {
        for (idx, record) in batch.iter().enumerate() {
            let Some(vocabulary) = self.taxonomy.vocabulary_for(&record.division) else {
                continue;
            };

            let title = record.title.to_lowercase();
            if title.chars().count() <= CONTEXT_MIN_TITLE_LEN {
                continue;
            }
            if vocabulary.iter().any(|word| title.contains(word.as_str())) {
                continue;
            }

            issues.push(
                Issue::new(
                    Severity::Low,
                    IssueCategory::Context,
                    format!(
                        "title may not match division context: division {} ({})",
                        record.division,
                        self.taxonomy
                            .division_name(&record.division)
                            .unwrap_or("unknown")
                    ),
                )
                .at_line(idx + 1)
                .for_code(&record.code)
                .with_details(json!({
                    "title": record.title,
                    "expected_words": vocabulary,
                })),
            );
        }
    }

    fn detect_anomalies(&self, batch: &[CatalogRecord], stats: &mut AuditStats) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        let avg_length =
            batch.iter().map(CatalogRecord::title_len).sum::<usize>() as f64 / batch.len() as f64;

        for (idx, record) in batch.iter().enumerate() {
            let length = record.title_len();
            if length as f64 > avg_length * 3.0 {
                anomalies.push(Anomaly::UnusuallyLongTitle {
                    line_number: idx + 1,
                    code: record.code.clone(),
                    length,
                    avg_length,
                });
            } else if length > 0 && (length as f64) < avg_length * 0.3 {
                anomalies.push(Anomaly::UnusuallyShortTitle {
                    line_number: idx + 1,
                    code: record.code.clone(),
                    length,
                    avg_length,
                });
            }
        }

        let mut by_division: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for record in batch {
            if let Some(value) = record.numeric_code() {
                by_division.entry(record.division.as_str()).or_default().push(value);
            }
        }

        for (division, mut values) in by_division {
            if values.len() < 2 {
                continue;
            }
            values.sort_unstable();
            for pair in values.windows(2) {
                let gap = pair[1] - pair[0];
                if gap > LARGE_GAP {
                    anomalies.push(Anomaly::LargeSequenceGap {
                        division: division.to_string(),
                        gap,
                        before_code: pair[0],
                        after_code: pair[1],
                    });
                }
            }
        }

        stats.anomalies_detected = anomalies.len();
        anomalies
    }

    fn verify_coverage(&self, batch: &[CatalogRecord], issues: &mut Vec<Issue>) {
        let mut per_division: BTreeMap<&str, usize> = BTreeMap::new();
        for record in batch {
            *per_division.entry(record.division.as_str()).or_default() += 1;
        }

        for (division, count) in per_division {
            if count < MIN_DIVISION_RECORDS && self.taxonomy.is_known(division) {
                issues.push(
                    Issue::new(
                        Severity::Low,
                        IssueCategory::Coverage,
                        format!("division {division} has only {count} records (may be incomplete)"),
                    )
                    .for_code(division)
                    .with_details(json!({ "count": count })),
                );
            }
        }
    }
}

impl ConsistencyAudit for BatchAuditor {
    fn audit(&self, batch: &[CatalogRecord]) -> Result<AuditReport> {
        info!("starting semantic audit of {} records", batch.len());

        let mut stats = AuditStats {
            total_records: batch.len(),
            ..AuditStats::default()
        };

        if batch.is_empty() {
            let issues = vec![Issue::new(
                Severity::Critical,
                IssueCategory::Coverage,
                "no records provided for audit",
            )];
            return Ok(AuditReport {
                passed: false,
                issues,
                stats,
                anomalies: Vec::new(),
            });
        }

        let mut issues = Vec::new();

        self.check_hierarchy(batch, &mut issues, &mut stats);
        self.verify_sequence(batch, &mut issues, &mut stats);
        self.cross_reference(batch, &mut issues, &mut stats);
        self.analyze_context(batch, &mut issues);

        let anomalies = if self.config.detect_anomalies {
            self.detect_anomalies(batch, &mut stats)
        } else {
            Vec::new()
        };

        self.verify_coverage(batch, &mut issues);

        let critical = severity_count(&issues, Severity::Critical);
        let high = severity_count(&issues, Severity::High);
        let passed = critical == 0 && high < self.config.max_high_issues;

        info!(
            "semantic audit {}: {} issues, {} anomalies",
            if passed { "passed" } else { "failed" },
            issues.len(),
            anomalies.len()
        );

        Ok(AuditReport {
            passed,
            issues,
            stats,
            anomalies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auditor() -> BatchAuditor {
        BatchAuditor::new(AuditorConfig::default(), DivisionTaxonomy::masterformat())
    }

    fn record(division: &str, code: &str, title: &str) -> CatalogRecord {
        CatalogRecord::new(division, code, title)
    }

    #[test]
    fn empty_batch_fails_the_audit() {
        let report = auditor().audit(&[]).unwrap();
        assert!(!report.passed);
        assert_eq!(severity_count(&report.issues, Severity::Critical), 1);
    }

    #[test]
    fn orphaned_level2_codes_are_flagged() {
        let batch = vec![
            record("03", "03 30 10", "Structural Concrete Mixes"),
            record("03", "03 30 20", "Concrete Finishing Mixes"),
        ];
        let report = auditor().audit(&batch).unwrap();
        let orphan: Vec<&Issue> = report
            .issues
            .iter()
            .filter(|i| i.category == IssueCategory::Hierarchy)
            .collect();
        assert_eq!(orphan.len(), 1);
        assert_eq!(orphan[0].severity, Severity::Medium);
        assert_eq!(orphan[0].code.as_deref(), Some("03 30"));
    }

    #[test]
    fn level2_codes_with_a_parent_record_are_fine() {
        let batch = vec![
            record("03", "03 30", "Cast-In-Place Concrete"),
            record("03", "03 30 10", "Structural Concrete Mixes"),
            record("03", "03 30 20", "Concrete Finishing Mixes"),
        ];
        let report = auditor().audit(&batch).unwrap();
        assert!(!report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::Hierarchy));
        assert_eq!(report.stats.level1_codes, 1);
        assert_eq!(report.stats.level2_codes, 2);
    }

    #[test]
    fn division_going_backwards_is_a_high_sequence_break() {
        let batch = vec![
            record("04", "04 20", "Unit Masonry Blocks"),
            record("03", "03 30", "Cast-In-Place Concrete"),
        ];
        let report = auditor().audit(&batch).unwrap();
        let breaks: Vec<&Issue> = report
            .issues
            .iter()
            .filter(|i| i.category == IssueCategory::Sequence && i.severity == Severity::High)
            .collect();
        assert_eq!(breaks.len(), 1);
        assert!(breaks[0].message.contains("04 -> 03"));
        assert_eq!(report.stats.sequence_breaks, 1);
    }

    #[test]
    fn small_backward_jumps_within_a_division_are_tolerated() {
        let batch = vec![
            record("03", "03 20", "Concrete Reinforcing Bars"),
            record("03", "03 15", "Concrete Accessories Set"),
        ];
        let report = auditor().audit(&batch).unwrap();
        assert!(!report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::Sequence));
    }

    #[test]
    fn large_backward_jumps_within_a_division_are_low_issues() {
        let batch = vec![
            record("03", "03 50", "Concrete Decks and Toppings"),
            record("03", "03 10", "Concrete Forming Accessories"),
        ];
        let report = auditor().audit(&batch).unwrap();
        let breaks: Vec<&Issue> = report
            .issues
            .iter()
            .filter(|i| i.category == IssueCategory::Sequence)
            .collect();
        assert_eq!(breaks.len(), 1);
        assert_eq!(breaks[0].severity, Severity::Low);
    }

    #[test]
    fn non_numeric_codes_cannot_be_sequence_verified() {
        let batch = vec![record("03", "AB CD", "Cast-In-Place Concrete")];
        let report = auditor().audit(&batch).unwrap();
        assert!(report.issues.iter().any(|i| {
            i.category == IssueCategory::Sequence
                && i.severity == Severity::Medium
                && i.message.contains("unable to verify")
        }));
    }

    #[test]
    fn unknown_divisions_are_cross_reference_issues() {
        let batch = vec![
            record("99", "99 10", "Mystery Section Entries"),
            record("99", "99 20", "More Mystery Entries!"),
            record("99", "99 30", "Even More Mystery Entries"),
        ];
        let report = auditor().audit(&batch).unwrap();
        let unknown: Vec<&Issue> = report
            .issues
            .iter()
            .filter(|i| i.category == IssueCategory::CrossReference)
            .collect();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].severity, Severity::Medium);
        assert_eq!(report.stats.unknown_divisions, 1);
    }

    #[test]
    fn sparse_known_divisions_look_incomplete() {
        let batch = vec![
            record("03", "03 30", "Cast-In-Place Concrete"),
            record("03", "03 40", "Precast Concrete Panels"),
        ];
        let report = auditor().audit(&batch).unwrap();
        assert!(report.issues.iter().any(|i| {
            i.category == IssueCategory::Coverage
                && i.severity == Severity::Low
                && i.message.contains("only 2 records")
        }));
    }

    #[test]
    fn off_context_titles_are_flagged_low() {
        let batch = vec![record("03", "03 30", "Underwater Basket Weaving")];
        let report = auditor().audit(&batch).unwrap();
        assert!(report.issues.iter().any(|i| {
            i.category == IssueCategory::Context && i.severity == Severity::Low
        }));
    }

    #[test]
    fn title_length_outliers_become_anomalies_not_issues() {
        let mut batch: Vec<CatalogRecord> = (10..20)
            .map(|i| record("03", &format!("03 {i}"), "Cast-In-Place Concrete Wall"))
            .collect();
        batch.push(record("03", "03 90", "C"));
        let report = auditor().audit(&batch).unwrap();
        assert!(report
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::UnusuallyShortTitle { length: 1, .. })));
        assert_eq!(report.stats.anomalies_detected, report.anomalies.len());
    }

    #[test]
    fn large_code_gaps_are_anomalies() {
        let batch = vec![
            record("03", "03 10", "Concrete Forming Accessories"),
            record("03", "03 99 99", "Concrete Specialty Hardware"),
        ];
        let report = auditor().audit(&batch).unwrap();
        assert!(report.anomalies.iter().any(|a| matches!(
            a,
            Anomaly::LargeSequenceGap { gap, .. } if *gap > 1000
        )));
    }

    #[test]
    fn anomaly_detection_can_be_disabled() {
        let config = AuditorConfig {
            detect_anomalies: false,
            ..AuditorConfig::default()
        };
        let batch = vec![
            record("03", "03 10", "Concrete Forming Accessories"),
            record("03", "03 99 99", "Concrete Specialty Hardware"),
        ];
        let report =
            BatchAuditor::new(config, DivisionTaxonomy::masterformat()).audit(&batch).unwrap();
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn high_issue_ceiling_controls_pass() {
        // Six division regressions produce six HIGH sequence breaks.
        let mut batch = Vec::new();
        for _ in 0..6 {
            batch.push(record("04", "04 20", "Unit Masonry Blocks"));
            batch.push(record("03", "03 30", "Cast-In-Place Concrete"));
        }
        let report = auditor().audit(&batch).unwrap();
        assert!(severity_count(&report.issues, Severity::High) >= 6);
        assert!(!report.passed);
    }
}
