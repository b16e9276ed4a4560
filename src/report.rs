use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::pipeline::auditor::AuditStats;
use crate::pipeline::orchestrator::{AggregatedIssue, OrchestrationResult};
use crate::pipeline::quality::QcStats;
use crate::pipeline::validator::ValidationStats;
use crate::types::CatalogRecord;

/// Full report artifact: the run summary plus each stage's published
/// stats and the flattened issue list.
#[derive(Serialize)]
struct ReportDocument<'a> {
    summary: &'a OrchestrationResult,
    validator: ValidatorSection<'a>,
    auditor: AuditorSection<'a>,
    qc: QcSection<'a>,
    detailed_issues: &'a [AggregatedIssue],
    dataset_info: DatasetInfo,
}

#[derive(Serialize)]
struct ValidatorSection<'a> {
    passed: bool,
    confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a ValidationStats>,
}

#[derive(Serialize)]
struct AuditorSection<'a> {
    passed: bool,
    anomaly_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a AuditStats>,
}

#[derive(Serialize)]
struct QcSection<'a> {
    confidence: f64,
    edge_case_count: usize,
    low_confidence_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a QcStats>,
}

#[derive(Serialize)]
struct DatasetInfo {
    total_records: usize,
    divisions: usize,
}

/// Serialize the complete run result as pretty JSON at `path`, creating
/// parent directories as needed. The caller decides whether a failed
/// write matters; the verdict it documents is already final.
pub fn write_report(
    result: &OrchestrationResult,
    batch: &[CatalogRecord],
    path: &Path,
) -> Result<()> {
    let divisions: BTreeSet<&str> = batch.iter().map(|r| r.division.as_str()).collect();

    let document = ReportDocument {
        summary: result,
        validator: ValidatorSection {
            passed: result.validator.as_ref().map_or(false, |v| v.passed),
            confidence: result
                .validator
                .as_ref()
                .map_or(0.0, |v| v.confidence_score),
            stats: result.validator.as_ref().map(|v| &v.stats),
        },
        auditor: AuditorSection {
            passed: result.auditor.as_ref().map_or(false, |a| a.passed),
            anomaly_count: result.auditor.as_ref().map_or(0, |a| a.anomalies.len()),
            stats: result.auditor.as_ref().map(|a| &a.stats),
        },
        qc: QcSection {
            confidence: result
                .quality
                .as_ref()
                .map_or(0.0, |q| q.overall_confidence),
            edge_case_count: result.quality.as_ref().map_or(0, |q| q.edge_cases.len()),
            low_confidence_count: result
                .quality
                .as_ref()
                .map_or(0, |q| q.low_confidence_entries.len()),
            stats: result.quality.as_ref().map(|q| &q.stats),
        },
        detailed_issues: &result.issues,
        dataset_info: DatasetInfo {
            total_records: batch.len(),
            divisions: divisions.len(),
        },
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(&document)?)?;

    Ok(())
}
