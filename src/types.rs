use serde::{Deserialize, Serialize};

/// One coded catalogue entry submitted for quality evaluation.
///
/// Records are immutable inputs to the pipeline; every stage takes the
/// batch by shared reference and publishes its findings as separate
/// [`Issue`] values keyed by the record's 1-based batch position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Two-digit top-level category identifier
    pub division: String,
    /// Hierarchical code, "XX XX" or "XX XX XX"
    pub code: String,
    /// Human-readable entry title
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgroup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl CatalogRecord {
    pub fn new(
        division: impl Into<String>,
        code: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            division: division.into(),
            code: code.into(),
            title: title.into(),
            group: None,
            subgroup: None,
            page_number: None,
        }
    }

    /// The code with all whitespace separators removed.
    pub fn compact_code(&self) -> String {
        self.code.split_whitespace().collect()
    }

    /// Numeric value of the compacted code, when it parses.
    pub fn numeric_code(&self) -> Option<i64> {
        let digits = self.compact_code();
        if digits.is_empty() {
            return None;
        }
        digits.parse().ok()
    }

    /// Title length in characters.
    pub fn title_len(&self) -> usize {
        self.title.chars().count()
    }

    /// True when every field is empty or absent.
    pub fn is_blank(&self) -> bool {
        self.division.trim().is_empty()
            && self.code.trim().is_empty()
            && self.title.trim().is_empty()
            && self.group.as_deref().map_or(true, |g| g.trim().is_empty())
            && self.subgroup.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.page_number.is_none()
    }
}

/// Severity of a finding. Ordering follows the gating rules:
/// `Critical` outranks `High` outranks `Medium` outranks `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category tag identifying which check produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCategory {
    Schema,
    Format,
    Consistency,
    Completeness,
    Encoding,
    Duplicate,
    Hierarchy,
    Sequence,
    CrossReference,
    Context,
    Coverage,
    EdgeCase,
    Confidence,
    Formatting,
    Readability,
    SpotCheck,
}

/// A single finding produced by a pipeline stage.
///
/// Issues are pure facts: once constructed they are never mutated, only
/// collected, counted, and reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub category: IssueCategory,
    pub message: String,
    /// 1-based position of the offending record in the batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Issue {
    pub fn new(severity: Severity, category: IssueCategory, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            line_number: None,
            code: None,
            details: None,
        }
    }

    pub fn at_line(mut self, line_number: usize) -> Self {
        self.line_number = Some(line_number);
        self
    }

    pub fn for_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Count issues at exactly the given severity.
pub fn severity_count(issues: &[Issue], severity: Severity) -> usize {
    issues.iter().filter(|i| i.severity == severity).count()
}

/// The analysis stage that produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageName {
    Validator,
    Auditor,
    QualityControl,
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageName::Validator => f.write_str("Validator"),
            StageName::Auditor => f.write_str("Auditor"),
            StageName::QualityControl => f.write_str("QualityControl"),
        }
    }
}

/// A statistically unusual pattern, recorded separately from issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Anomaly {
    UnusuallyLongTitle {
        line_number: usize,
        code: String,
        length: usize,
        avg_length: f64,
    },
    UnusuallyShortTitle {
        line_number: usize,
        code: String,
        length: usize,
        avg_length: f64,
    },
    LargeSequenceGap {
        division: String,
        gap: i64,
        before_code: i64,
        after_code: i64,
    },
}

/// Boundary condition or rare pattern noted by quality control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCase {
    pub kind: EdgeCaseKind,
    pub line_number: usize,
    pub code: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCaseKind {
    CategoryCode,
    ShortCode,
    SpecialCharacters,
    NumericContent,
    AllCaps,
    RepeatedWords,
}

/// A record whose per-record confidence fell below the review threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowConfidenceEntry {
    pub line_number: usize,
    pub division: String,
    pub code: String,
    pub title: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_gating_rules() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn compact_code_strips_all_separators() {
        let record = CatalogRecord::new("03", "03 30 00", "Cast-In-Place Concrete");
        assert_eq!(record.compact_code(), "033000");
        assert_eq!(record.numeric_code(), Some(33000));
    }

    #[test]
    fn blank_record_is_detected() {
        let record = CatalogRecord::new("", "", "");
        assert!(record.is_blank());

        let mut with_page = CatalogRecord::new("", "", "");
        with_page.page_number = Some(12);
        assert!(!with_page.is_blank());
    }

    #[test]
    fn record_deserializes_without_optional_fields() {
        let record: CatalogRecord =
            serde_json::from_str(r#"{"division":"03","code":"03 30","title":"Concrete"}"#).unwrap();
        assert_eq!(record.division, "03");
        assert_eq!(record.page_number, None);
    }

    #[test]
    fn severity_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"CRITICAL\""
        );
    }
}
