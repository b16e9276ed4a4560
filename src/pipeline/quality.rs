use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::config::QualityConfig;
use crate::error::Result;
use crate::types::{
    severity_count, CatalogRecord, EdgeCase, EdgeCaseKind, Issue, IssueCategory,
    LowConfidenceEntry, Severity,
};

/// Anything outside letters, digits, whitespace, and `- , ( ) . & /`.
static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s\-,().&/]").unwrap());
static NUMERIC_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").unwrap());
static CAPS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]{10,}").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Punctuation a complete title should not trail off with.
const DANGLING_PUNCTUATION: [char; 3] = ['-', '\u{2014}', ','];
/// Batches below this size are suspicious.
const MIN_BATCH_SIZE: usize = 10;
/// Codes with fewer digits than this look incomplete.
const MIN_CODE_DIGITS: usize = 4;

/// Result of the final quality control stage.
#[derive(Debug, Clone, Serialize)]
pub struct QcReport {
    pub passed: bool,
    /// 0-100
    pub overall_confidence: f64,
    pub requires_human_review: bool,
    pub issues: Vec<Issue>,
    pub low_confidence_entries: Vec<LowConfidenceEntry>,
    pub edge_cases: Vec<EdgeCase>,
    pub stats: QcStats,
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QcStats {
    pub total_records: usize,
    pub edge_cases_found: usize,
    pub low_confidence_count: usize,
    pub formatting_issues: usize,
    /// Mean per-record confidence, 0-100
    pub avg_confidence: f64,
}

/// Final judgment layer: edge cases, per-record confidence, and the
/// overall readiness verdict.
pub trait FinalReview {
    fn verify(&self, batch: &[CatalogRecord], source: Option<&Path>) -> Result<QcReport>;
}

/// Default quality controller.
pub struct QualityController {
    config: QualityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TitleCasing {
    Title,
    Upper,
    Lower,
    Sentence,
    Mixed,
}

impl TitleCasing {
    fn label(self) -> &'static str {
        match self {
            TitleCasing::Title => "title_case",
            TitleCasing::Upper => "upper_case",
            TitleCasing::Lower => "lower_case",
            TitleCasing::Sentence => "sentence_case",
            TitleCasing::Mixed => "mixed",
        }
    }
}

/// Cased characters exist and every cased character is uppercase.
fn is_upper(text: &str) -> bool {
    let mut any_cased = false;
    for c in text.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            any_cased = true;
        }
    }
    any_cased
}

/// Cased characters exist and every cased character is lowercase.
fn is_lower(text: &str) -> bool {
    let mut any_cased = false;
    for c in text.chars() {
        if c.is_uppercase() {
            return false;
        }
        if c.is_lowercase() {
            any_cased = true;
        }
    }
    any_cased
}

/// Uppercase letters only start words, lowercase letters only continue
/// them.
fn is_title_case(text: &str) -> bool {
    let mut prev_cased = false;
    let mut any_cased = false;
    for c in text.chars() {
        if c.is_uppercase() {
            if prev_cased {
                return false;
            }
            prev_cased = true;
            any_cased = true;
        } else if c.is_lowercase() {
            if !prev_cased {
                return false;
            }
            any_cased = true;
        } else {
            prev_cased = false;
        }
    }
    any_cased
}

fn classify_casing(title: &str) -> TitleCasing {
    if is_title_case(title) {
        TitleCasing::Title
    } else if is_upper(title) {
        TitleCasing::Upper
    } else if is_lower(title) {
        TitleCasing::Lower
    } else if title.chars().next().is_some_and(char::is_uppercase) {
        TitleCasing::Sentence
    } else {
        TitleCasing::Mixed
    }
}

/// True when any non-whitespace character repeats `min_run` or more times
/// in a row. `regex` has no back-references, so this is a plain scan.
fn has_char_run(text: &str, min_run: usize) -> bool {
    let mut prev: Option<char> = None;
    let mut run = 0;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run >= min_run && !c.is_whitespace() {
            return true;
        }
    }
    false
}

impl QualityController {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    fn detect_edge_cases(
        &self,
        batch: &[CatalogRecord],
        edge_cases: &mut Vec<EdgeCase>,
        stats: &mut QcStats,
    ) -> Vec<Issue> {
        let mut issues = Vec::new();

        for (idx, record) in batch.iter().enumerate() {
            let line = idx + 1;

            if record.code.trim().ends_with("00") {
                edge_cases.push(EdgeCase {
                    kind: EdgeCaseKind::CategoryCode,
                    line_number: line,
                    code: record.code.clone(),
                    title: record.title.clone(),
                    note: Some("high-level category code (ends in 00)".to_string()),
                });
            }

            let digits = record.compact_code();
            if digits.chars().count() < MIN_CODE_DIGITS {
                issues.push(
                    Issue::new(
                        Severity::Medium,
                        IssueCategory::EdgeCase,
                        format!(
                            "unusually short code: \"{}\" ({} digits)",
                            record.code,
                            digits.chars().count()
                        ),
                    )
                    .at_line(line)
                    .for_code(&record.code),
                );
                edge_cases.push(EdgeCase {
                    kind: EdgeCaseKind::ShortCode,
                    line_number: line,
                    code: record.code.clone(),
                    title: record.title.clone(),
                    note: None,
                });
            }

            let unexpected: Vec<String> = UNSAFE_CHARS
                .find_iter(&record.title)
                .map(|m| m.as_str().to_string())
                .collect();
            if !unexpected.is_empty() {
                edge_cases.push(EdgeCase {
                    kind: EdgeCaseKind::SpecialCharacters,
                    line_number: line,
                    code: record.code.clone(),
                    title: record.title.clone(),
                    note: Some(format!("unexpected characters: {}", unexpected.join(" "))),
                });
            }

            if NUMERIC_RUN.is_match(&record.title) {
                edge_cases.push(EdgeCase {
                    kind: EdgeCaseKind::NumericContent,
                    line_number: line,
                    code: record.code.clone(),
                    title: record.title.clone(),
                    note: Some("title contains numeric sequences".to_string()),
                });
            }

            if is_upper(&record.title) && record.title_len() > 5 {
                edge_cases.push(EdgeCase {
                    kind: EdgeCaseKind::AllCaps,
                    line_number: line,
                    code: record.code.clone(),
                    title: record.title.clone(),
                    note: Some("all caps title (possibly a section header)".to_string()),
                });
            }

            let words: Vec<String> = record
                .title
                .to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for word in &words {
                *counts.entry(word.as_str()).or_default() += 1;
            }
            let mut repeated: Vec<&str> = Vec::new();
            for word in &words {
                if word.chars().count() > 3
                    && counts[word.as_str()] > 1
                    && !repeated.contains(&word.as_str())
                {
                    repeated.push(word.as_str());
                }
            }
            if !repeated.is_empty() {
                edge_cases.push(EdgeCase {
                    kind: EdgeCaseKind::RepeatedWords,
                    line_number: line,
                    code: record.code.clone(),
                    title: record.title.clone(),
                    note: Some(format!("repeated words: {}", repeated.join(", "))),
                });
            }
        }

        stats.edge_cases_found = edge_cases.len();
        issues
    }

    fn check_formatting(&self, batch: &[CatalogRecord], stats: &mut QcStats) -> Vec<Issue> {
        let mut issues = Vec::new();

        let mut casing_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut classified = 0usize;
        for record in batch {
            if record.title.is_empty() {
                continue;
            }
            *casing_counts.entry(classify_casing(&record.title).label()).or_default() += 1;
            classified += 1;
        }

        if classified > 0 {
            let (dominant, count) = casing_counts
                .iter()
                .max_by_key(|entry| *entry.1)
                .map(|(label, count)| (*label, *count))
                .unwrap_or(("mixed", 0));
            let ratio = count as f64 / classified as f64;
            if ratio < 0.8 {
                issues.push(
                    Issue::new(
                        Severity::Low,
                        IssueCategory::Formatting,
                        format!(
                            "inconsistent title casing: {} dominant at {:.0}%",
                            dominant,
                            ratio * 100.0
                        ),
                    )
                    .with_details(json!({ "case_distribution": casing_counts })),
                );
                stats.formatting_issues += 1;
            }
        }

        let mut spacing_counts: BTreeMap<usize, usize> = BTreeMap::new();
        for record in batch {
            let spaces = record.code.chars().filter(|c| *c == ' ').count();
            *spacing_counts.entry(spaces).or_default() += 1;
        }
        if spacing_counts.len() > 2 {
            let distribution: BTreeMap<String, usize> = spacing_counts
                .iter()
                .map(|(spaces, count)| (spaces.to_string(), *count))
                .collect();
            issues.push(
                Issue::new(
                    Severity::Low,
                    IssueCategory::Formatting,
                    "inconsistent code spacing patterns detected",
                )
                .with_details(json!({ "spacing_distribution": distribution })),
            );
            stats.formatting_issues += 1;
        }

        issues
    }

    fn assess_readability(&self, batch: &[CatalogRecord]) -> Vec<Issue> {
        let mut issues = Vec::new();

        for (idx, record) in batch.iter().enumerate() {
            let line = idx + 1;
            let title = &record.title;

            let mut problems: Vec<&str> = Vec::new();
            if CAPS_RUN.is_match(title) {
                problems.push("excessive consecutive capitals");
            }
            if MULTI_SPACE.is_match(title) {
                problems.push("multiple consecutive spaces");
            }
            if has_char_run(title, 5) {
                problems.push("repeated characters");
            }
            if title.chars().next().is_some_and(|c| !c.is_ascii_alphabetic()) {
                problems.push("title starts with a non-letter");
            }

            for problem in problems {
                issues.push(
                    Issue::new(
                        Severity::Low,
                        IssueCategory::Readability,
                        format!("{problem} in title"),
                    )
                    .at_line(line)
                    .for_code(&record.code)
                    .with_details(json!({ "title": title })),
                );
            }
        }

        issues
    }

    fn score_records(
        &self,
        batch: &[CatalogRecord],
        stats: &mut QcStats,
    ) -> (f64, Vec<LowConfidenceEntry>) {
        let avg_title_length =
            batch.iter().map(CatalogRecord::title_len).sum::<usize>() as f64 / batch.len() as f64;

        let mut low_confidence = Vec::new();
        let mut total = 0.0f64;

        for (idx, record) in batch.iter().enumerate() {
            let mut confidence = 1.0f64;
            let mut reasons: Vec<String> = Vec::new();

            let length = record.title_len() as f64;
            if length < avg_title_length * 0.3 {
                confidence -= 0.2;
                reasons.push("title significantly shorter than average".to_string());
            } else if length > avg_title_length * 3.0 {
                confidence -= 0.1;
                reasons.push("title significantly longer than average".to_string());
            }

            if record.compact_code().chars().count() < MIN_CODE_DIGITS {
                confidence -= 0.3;
                reasons.push("code appears incomplete".to_string());
            }

            if UNSAFE_CHARS.is_match(&record.title) {
                confidence -= 0.1;
                reasons.push("special characters in title".to_string());
            }

            if record
                .title
                .trim_end()
                .ends_with(&DANGLING_PUNCTUATION[..])
            {
                confidence -= 0.2;
                reasons.push("title ends with punctuation".to_string());
            }

            let words: Vec<&str> = record.title.split_whitespace().collect();
            if !words.is_empty() {
                let single = words.iter().filter(|w| w.chars().count() <= 1).count();
                if single as f64 > words.len() as f64 * 0.3 {
                    confidence -= 0.15;
                    reasons.push("many single-letter words".to_string());
                }
            }

            if record.title.trim().is_empty() {
                confidence = 0.0;
                reasons.push("missing title".to_string());
            }

            let confidence = confidence.clamp(0.0, 1.0);
            total += confidence;

            if confidence < self.config.confidence_threshold {
                low_confidence.push(LowConfidenceEntry {
                    line_number: idx + 1,
                    division: record.division.clone(),
                    code: record.code.clone(),
                    title: record.title.clone(),
                    confidence,
                    reasons,
                });
            }
        }

        let avg_confidence = total / batch.len() as f64 * 100.0;
        stats.avg_confidence = avg_confidence;
        stats.low_confidence_count = low_confidence.len();

        (avg_confidence, low_confidence)
    }

    fn spot_check(&self, batch: &[CatalogRecord], source: &Path) -> Issue {
        let sample_size = self.config.sample_size.min(
            ((batch.len() as f64 * self.config.spot_check_percentage / 100.0) as usize).max(5),
        );

        let mut rng = match self.config.spot_check_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut indices: Vec<usize> = if batch.len() > sample_size {
            rand::seq::index::sample(&mut rng, batch.len(), sample_size).into_vec()
        } else {
            (0..batch.len()).collect()
        };
        indices.sort_unstable();

        info!("spot-checking {} sampled records", indices.len());

        Issue::new(
            Severity::Low,
            IssueCategory::SpotCheck,
            format!(
                "manual spot-check recommended for {} sampled records",
                indices.len()
            ),
        )
        .with_details(json!({
            "source": source.display().to_string(),
            "sample_count": indices.len(),
            "sample_indices": indices.iter().take(10).collect::<Vec<_>>(),
        }))
    }

    fn final_completeness(&self, batch: &[CatalogRecord]) -> Vec<Issue> {
        let mut issues = Vec::new();

        for (idx, record) in batch.iter().enumerate() {
            if record.is_blank() {
                issues.push(
                    Issue::new(
                        Severity::Critical,
                        IssueCategory::Completeness,
                        "completely empty record found",
                    )
                    .at_line(idx + 1),
                );
            }
        }

        if batch.len() < MIN_BATCH_SIZE {
            issues.push(
                Issue::new(
                    Severity::Medium,
                    IssueCategory::Completeness,
                    format!("very small batch: only {} records", batch.len()),
                )
                .with_details(json!({ "record_count": batch.len() })),
            );
        }

        issues
    }

    fn apply_deductions(base_confidence: f64, issues: &[Issue]) -> f64 {
        let critical = severity_count(issues, Severity::Critical) as f64;
        let high = severity_count(issues, Severity::High) as f64;
        let medium = severity_count(issues, Severity::Medium) as f64;

        (base_confidence - critical * 20.0 - high * 5.0 - medium * 2.0).clamp(0.0, 100.0)
    }

    fn recommendation(&self, confidence: f64, issues: &[Issue]) -> String {
        let critical = severity_count(issues, Severity::Critical);

        if critical > 0 {
            return format!(
                "FAIL: {critical} critical issues found. Batch requires correction before use."
            );
        }

        if confidence >= 98.0 {
            format!("PASS: excellent quality ({confidence:.1}% confidence). Batch is ready for production use.")
        } else if confidence >= 95.0 {
            format!("PASS: good quality ({confidence:.1}% confidence). Ready for use with minor monitoring.")
        } else if confidence >= 90.0 {
            format!("REVIEW: acceptable quality ({confidence:.1}% confidence). Recommend a spot-check before production use.")
        } else {
            format!("REVIEW: below threshold ({confidence:.1}% confidence). Manual review required before use.")
        }
    }
}

impl FinalReview for QualityController {
    fn verify(&self, batch: &[CatalogRecord], source: Option<&Path>) -> Result<QcReport> {
        info!("starting quality control verification of {} records", batch.len());

        let mut stats = QcStats {
            total_records: batch.len(),
            ..QcStats::default()
        };

        if batch.is_empty() {
            return Ok(QcReport {
                passed: false,
                overall_confidence: 0.0,
                requires_human_review: true,
                issues: Vec::new(),
                low_confidence_entries: Vec::new(),
                edge_cases: Vec::new(),
                stats,
                recommendation: "FAIL: no records provided for verification".to_string(),
            });
        }

        let mut edge_cases = Vec::new();
        let mut issues = self.detect_edge_cases(batch, &mut edge_cases, &mut stats);
        issues.extend(self.check_formatting(batch, &mut stats));
        issues.extend(self.assess_readability(batch));

        let (base_confidence, low_confidence_entries) = self.score_records(batch, &mut stats);

        if let Some(source) = source {
            issues.push(self.spot_check(batch, source));
        }

        issues.extend(self.final_completeness(batch));

        let overall_confidence = Self::apply_deductions(base_confidence, &issues);
        let threshold = self.config.confidence_threshold * 100.0;
        let requires_human_review = overall_confidence < threshold;

        let recommendation = self.recommendation(overall_confidence, &issues);

        let critical = severity_count(&issues, Severity::Critical);
        let passed = critical == 0 && overall_confidence >= threshold && !requires_human_review;

        info!(
            "quality control {}: confidence {:.1}% | {} issues, {} low-confidence entries",
            if passed { "passed" } else { "requires review" },
            overall_confidence,
            issues.len(),
            low_confidence_entries.len()
        );

        Ok(QcReport {
            passed,
            overall_confidence,
            requires_human_review,
            issues,
            low_confidence_entries,
            edge_cases,
            stats,
            recommendation,
        })
    }
}
