use std::path::Path;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{GateConfig, QaConfig};
use crate::error::Result;
use crate::pipeline::auditor::{AuditReport, BatchAuditor, ConsistencyAudit};
use crate::pipeline::quality::{FinalReview, QcReport, QualityController};
use crate::pipeline::validator::{BatchValidator, StructuralCheck, ValidationReport};
use crate::taxonomy::DivisionTaxonomy;
use crate::types::{CatalogRecord, Issue, Severity, StageName};

/// Final decision over a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Review,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Review => "REVIEW",
            Verdict::Fail => "FAIL",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issue tagged with the stage that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedIssue {
    pub agent: StageName,
    #[serde(flatten)]
    pub issue: Issue,
}

/// Outcome of one pipeline run. Immutable after construction; the stage
/// reports are kept for programmatic access and nested into the report
/// artifact, but excluded from the summary serialization.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub run_id: Uuid,
    pub status: Verdict,
    /// 0-100
    pub overall_confidence: f64,
    pub requires_human_review: bool,
    pub total_issues: usize,
    pub critical_issues: usize,
    pub high_issues: usize,
    pub medium_issues: usize,
    pub low_issues: usize,
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub issues: Vec<AggregatedIssue>,
    #[serde(skip_serializing)]
    pub validator: Option<ValidationReport>,
    #[serde(skip_serializing)]
    pub auditor: Option<AuditReport>,
    #[serde(skip_serializing)]
    pub quality: Option<QcReport>,
}

/// Sequences the three analysis stages, applies the quality gates between
/// them, and folds all published results into one verdict.
///
/// Stages are held behind their capability traits and can be substituted
/// individually. Per-run state lives entirely in the returned result.
pub struct Orchestrator {
    validator: Box<dyn StructuralCheck + Send + Sync>,
    auditor: Box<dyn ConsistencyAudit + Send + Sync>,
    quality: Box<dyn FinalReview + Send + Sync>,
    gates: GateConfig,
}

impl Orchestrator {
    /// Wire the default stages from one configuration and a reference
    /// taxonomy.
    pub fn new(config: QaConfig, taxonomy: DivisionTaxonomy) -> Self {
        let QaConfig {
            validator,
            auditor,
            quality,
            gates,
        } = config;
        Self {
            validator: Box::new(BatchValidator::new(validator)),
            auditor: Box::new(BatchAuditor::new(auditor, taxonomy)),
            quality: Box::new(QualityController::new(quality)),
            gates,
        }
    }

    /// Assemble an orchestrator from explicit stage implementations.
    pub fn with_stages(
        validator: Box<dyn StructuralCheck + Send + Sync>,
        auditor: Box<dyn ConsistencyAudit + Send + Sync>,
        quality: Box<dyn FinalReview + Send + Sync>,
        gates: GateConfig,
    ) -> Self {
        Self {
            validator,
            auditor,
            quality,
            gates,
        }
    }

    /// Run the full pipeline over one record batch.
    ///
    /// A `FAIL`/`REVIEW` verdict is a deliberate quality judgment and is
    /// returned as `Ok`; an `Err` is an operational fault inside a stage
    /// and never carries a verdict.
    pub fn run(
        &self,
        batch: &[CatalogRecord],
        source: Option<&Path>,
    ) -> Result<OrchestrationResult> {
        info!("starting quality pipeline for {} records", batch.len());
        counter!("qa_pipeline_runs_total").increment(1);
        let run_started = std::time::Instant::now();

        info!("[stage 1/3] structural validation");
        let validation = self.validator.validate(batch)?;

        let critical_errors = crate::types::severity_count(&validation.errors, Severity::Critical);
        if critical_errors > self.gates.max_critical_errors {
            warn!(
                "critical gate failed: {} critical errors (max: {})",
                critical_errors, self.gates.max_critical_errors
            );
            let result = self.failure_result(validation, critical_errors);
            counter!("qa_pipeline_verdicts_total", "status" => result.status.as_str())
                .increment(1);
            return Ok(result);
        }
        info!(
            "validator passed with {:.1}% confidence",
            validation.confidence_score
        );

        info!("[stage 2/3] semantic audit");
        let audit = self.auditor.audit(batch)?;

        let audit_high = crate::types::severity_count(&audit.issues, Severity::High);
        if audit_high > self.gates.max_high_issues {
            warn!(
                "warning gate triggered: {} high issues (threshold: {})",
                audit_high, self.gates.max_high_issues
            );
        }
        info!(
            "auditor completed with {} issues, {} anomalies",
            audit.issues.len(),
            audit.anomalies.len()
        );

        info!("[stage 3/3] quality control");
        let qc = self.quality.verify(batch, source)?;
        if qc.requires_human_review {
            warn!(
                "confidence gate: {:.1}% below threshold {:.1}%",
                qc.overall_confidence, self.gates.min_confidence
            );
        }
        info!("quality control completed with {:.1}% confidence", qc.overall_confidence);

        let result = self.aggregate(validation, audit, qc);

        histogram!("qa_pipeline_duration_seconds").record(run_started.elapsed().as_secs_f64());
        histogram!("qa_overall_confidence").record(result.overall_confidence);
        histogram!("qa_issues_per_run").record(result.total_issues as f64);
        counter!("qa_pipeline_verdicts_total", "status" => result.status.as_str()).increment(1);

        info!(
            "final decision: {} | confidence {:.1}% | {} issues ({} critical, {} high) | review required: {}",
            result.status,
            result.overall_confidence,
            result.total_issues,
            result.critical_issues,
            result.high_issues,
            result.requires_human_review
        );

        Ok(result)
    }

    fn flatten(
        validation: &ValidationReport,
        audit: Option<&AuditReport>,
        qc: Option<&QcReport>,
    ) -> Vec<AggregatedIssue> {
        let mut issues = Vec::new();

        for issue in validation.errors.iter().chain(&validation.warnings) {
            issues.push(AggregatedIssue {
                agent: StageName::Validator,
                issue: issue.clone(),
            });
        }
        if let Some(audit) = audit {
            for issue in &audit.issues {
                issues.push(AggregatedIssue {
                    agent: StageName::Auditor,
                    issue: issue.clone(),
                });
            }
        }
        if let Some(qc) = qc {
            for issue in &qc.issues {
                issues.push(AggregatedIssue {
                    agent: StageName::QualityControl,
                    issue: issue.clone(),
                });
            }
        }

        issues
    }

    fn count(issues: &[AggregatedIssue], severity: Severity) -> usize {
        issues.iter().filter(|i| i.issue.severity == severity).count()
    }

    fn aggregate(
        &self,
        validation: ValidationReport,
        audit: AuditReport,
        qc: QcReport,
    ) -> OrchestrationResult {
        let issues = Self::flatten(&validation, Some(&audit), Some(&qc));

        let critical = Self::count(&issues, Severity::Critical);
        let high = Self::count(&issues, Severity::High);
        let medium = Self::count(&issues, Severity::Medium);
        let low = Self::count(&issues, Severity::Low);

        let auditor_score = (100.0 - audit.issues.len() as f64 * 2.0).max(0.0);
        let overall_confidence = (validation.confidence_score * 0.3
            + auditor_score * 0.3
            + qc.overall_confidence * 0.4)
            .clamp(0.0, 100.0);

        let status = if critical > 0 {
            Verdict::Fail
        } else if high > self.gates.max_high_issues
            || overall_confidence < self.gates.min_confidence
            || qc.requires_human_review
        {
            Verdict::Review
        } else {
            Verdict::Pass
        };
        let requires_human_review = status != Verdict::Pass;

        let recommendation =
            self.recommendation(status, overall_confidence, critical, high, &qc);

        OrchestrationResult {
            run_id: Uuid::new_v4(),
            status,
            overall_confidence,
            requires_human_review,
            total_issues: issues.len(),
            critical_issues: critical,
            high_issues: high,
            medium_issues: medium,
            low_issues: low,
            recommendation,
            timestamp: Utc::now(),
            issues,
            validator: Some(validation),
            auditor: Some(audit),
            quality: Some(qc),
        }
    }

    /// Short-circuit result for a tripped critical gate; only the
    /// validator's findings are carried.
    fn failure_result(
        &self,
        validation: ValidationReport,
        critical_errors: usize,
    ) -> OrchestrationResult {
        let issues = Self::flatten(&validation, None, None);

        let high = Self::count(&issues, Severity::High);
        let medium = Self::count(&issues, Severity::Medium);
        let low = Self::count(&issues, Severity::Low);

        OrchestrationResult {
            run_id: Uuid::new_v4(),
            status: Verdict::Fail,
            overall_confidence: 0.0,
            requires_human_review: true,
            total_issues: issues.len(),
            critical_issues: critical_errors,
            high_issues: high,
            medium_issues: medium,
            low_issues: low,
            recommendation: format!(
                "Batch FAILED validation with {critical_errors} critical issues. Requires correction before use."
            ),
            timestamp: Utc::now(),
            issues,
            validator: Some(validation),
            auditor: None,
            quality: None,
        }
    }

    fn recommendation(
        &self,
        status: Verdict,
        confidence: f64,
        critical: usize,
        high: usize,
        qc: &QcReport,
    ) -> String {
        match status {
            Verdict::Fail => format!(
                "Batch FAILED validation with {critical} critical issues. Requires correction before use."
            ),
            Verdict::Review => {
                let mut reasons = Vec::new();
                if high > self.gates.max_high_issues {
                    reasons.push(format!(
                        "{high} high-priority issues (max: {})",
                        self.gates.max_high_issues
                    ));
                }
                if confidence < self.gates.min_confidence {
                    reasons.push(format!(
                        "confidence {confidence:.1}% below the {:.1}% threshold",
                        self.gates.min_confidence
                    ));
                }
                if qc.requires_human_review {
                    reasons.push("quality control flagged the batch for manual review".to_string());
                }
                format!(
                    "Batch requires REVIEW due to: {}. Recommend a manual spot-check of {} low-confidence entries before use.",
                    reasons.join(", "),
                    qc.low_confidence_entries.len()
                )
            }
            Verdict::Pass => {
                if confidence >= 98.0 {
                    format!(
                        "Batch PASSED with excellent quality ({confidence:.1}% confidence). Ready for immediate use."
                    )
                } else if confidence >= 95.0 {
                    format!(
                        "Batch PASSED with good quality ({confidence:.1}% confidence). Minor issues detected but within acceptable limits."
                    )
                } else {
                    format!(
                        "Batch PASSED with acceptable quality ({confidence:.1}% confidence). Recommend periodic spot-checks during use."
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;
    use crate::error::QaError;
    use crate::types::{Issue, IssueCategory};

    fn record(division: &str, code: &str, title: &str) -> CatalogRecord {
        CatalogRecord::new(division, code, title)
    }

    fn clean_batch(size: usize) -> Vec<CatalogRecord> {
        (0..size)
            .map(|i| record("03", &format!("03 {:02}", 10 + i), "Concrete Assembly Unit"))
            .collect()
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(QaConfig::default(), DivisionTaxonomy::masterformat())
    }

    #[test]
    fn critical_gate_short_circuits_before_later_stages() {
        let mut batch = clean_batch(20);
        batch[5].title = String::new();

        let result = orchestrator().run(&batch, None).unwrap();
        assert_eq!(result.status, Verdict::Fail);
        assert_eq!(result.overall_confidence, 0.0);
        assert!(result.requires_human_review);
        assert!(result.auditor.is_none());
        assert!(result.quality.is_none());
        assert!(result.issues.iter().all(|i| i.agent == StageName::Validator));
    }

    #[test]
    fn aggregated_issues_each_carry_one_origin_stage() {
        let mut batch = clean_batch(20);
        batch[3].division = "04".to_string(); // consistency HIGH from the validator

        let result = orchestrator().run(&batch, None).unwrap();
        assert_eq!(result.total_issues, result.issues.len());
        assert!(result
            .issues
            .iter()
            .any(|i| i.agent == StageName::Validator));
    }

    #[test]
    fn overall_confidence_is_the_weighted_stage_blend() {
        let result = orchestrator().run(&clean_batch(50), None).unwrap();
        let validation = result.validator.as_ref().unwrap();
        let audit = result.auditor.as_ref().unwrap();
        let qc = result.quality.as_ref().unwrap();

        let auditor_score = (100.0 - audit.issues.len() as f64 * 2.0).max(0.0);
        let expected = validation.confidence_score * 0.3
            + auditor_score * 0.3
            + qc.overall_confidence * 0.4;
        assert!((result.overall_confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn review_recommendation_names_the_tripped_conditions() {
        let mut batch = clean_batch(50);
        for record in batch.iter_mut().take(6) {
            record.title = "X".to_string();
        }

        let result = orchestrator().run(&batch, None).unwrap();
        assert_eq!(result.status, Verdict::Review);
        assert!(result.recommendation.contains("high-priority issues"));
        assert!(result.recommendation.contains("low-confidence entries"));
    }

    struct FaultyAuditor;

    impl ConsistencyAudit for FaultyAuditor {
        fn audit(&self, _batch: &[CatalogRecord]) -> crate::error::Result<AuditReport> {
            Err(QaError::Config("auditor exploded".to_string()))
        }
    }

    #[test]
    fn stage_faults_propagate_instead_of_becoming_verdicts() {
        let config = QaConfig::default();
        let orchestrator = Orchestrator::with_stages(
            Box::new(BatchValidator::new(config.validator)),
            Box::new(FaultyAuditor),
            Box::new(QualityController::new(config.quality)),
            config.gates,
        );

        let err = orchestrator.run(&clean_batch(20), None).unwrap_err();
        assert!(matches!(err, QaError::Config(_)));
    }

    struct StubQuality;

    impl FinalReview for StubQuality {
        fn verify(
            &self,
            batch: &[CatalogRecord],
            _source: Option<&std::path::Path>,
        ) -> crate::error::Result<QcReport> {
            let mut report = QcReport {
                passed: false,
                overall_confidence: 99.0,
                requires_human_review: true,
                issues: vec![Issue::new(
                    Severity::Low,
                    IssueCategory::Confidence,
                    "stubbed review flag",
                )],
                low_confidence_entries: Vec::new(),
                edge_cases: Vec::new(),
                stats: Default::default(),
                recommendation: String::new(),
            };
            report.stats.total_records = batch.len();
            Ok(report)
        }
    }

    #[test]
    fn qc_review_flag_alone_forces_review() {
        let config = QaConfig::default();
        let orchestrator = Orchestrator::with_stages(
            Box::new(BatchValidator::new(config.validator.clone())),
            Box::new(BatchAuditor::new(
                config.auditor.clone(),
                DivisionTaxonomy::masterformat(),
            )),
            Box::new(StubQuality),
            config.gates,
        );

        let result = orchestrator.run(&clean_batch(50), None).unwrap();
        assert_eq!(result.status, Verdict::Review);
        assert!(result.requires_human_review);
        assert!(result
            .recommendation
            .contains("flagged the batch for manual review"));
    }

    #[test]
    fn quality_config_is_forwarded_to_the_spot_check() {
        let mut config = QaConfig::default();
        config.quality = QualityConfig {
            spot_check_seed: Some(11),
            ..QualityConfig::default()
        };
        let orchestrator = Orchestrator::new(config, DivisionTaxonomy::masterformat());
        let result = orchestrator
            .run(&clean_batch(50), Some(std::path::Path::new("catalogue.pdf")))
            .unwrap();
        assert!(result
            .issues
            .iter()
            .any(|i| i.issue.category == IssueCategory::SpotCheck));
    }
}
