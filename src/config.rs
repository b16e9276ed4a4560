use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{QaError, Result};

/// Configuration for the whole pipeline. Every field has a built-in
/// default, so an absent file or section is legitimate; an explicitly
/// requested file that cannot be read or parsed is a hard error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub validator: ValidatorConfig,
    pub auditor: AuditorConfig,
    pub quality: QualityConfig,
    pub gates: GateConfig,
}

impl QaConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            QaError::Config(format!("failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: QaConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}

/// Structural validation rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Accept "XX XX" codes
    pub allow_two_group_codes: bool,
    /// Accept "XX XX XX" codes
    pub allow_three_group_codes: bool,
    pub min_title_length: usize,
    pub max_title_length: usize,
    /// Substrings that indicate a cut-off title
    pub truncation_markers: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            allow_two_group_codes: true,
            allow_three_group_codes: true,
            min_title_length: 2,
            max_title_length: 200,
            truncation_markers: ["...", "\u{2026}", "..", "Procuremen", "Constructio"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Semantic audit rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    pub require_sequence_order: bool,
    pub check_cross_references: bool,
    pub detect_anomalies: bool,
    /// HIGH-issue ceiling below which the audit still counts as passed
    pub max_high_issues: usize,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            require_sequence_order: true,
            check_cross_references: true,
            detect_anomalies: true,
            max_high_issues: 5,
        }
    }
}

/// Quality control parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Per-record and overall confidence threshold, 0-1 scale
    pub confidence_threshold: f64,
    /// Upper bound on the spot-check sample
    pub sample_size: usize,
    /// Percentage of the batch drawn for spot-checking
    pub spot_check_percentage: f64,
    /// Fixed RNG seed for the spot-check draw; unset means entropy
    pub spot_check_seed: Option<u64>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.95,
            sample_size: 100,
            spot_check_percentage: 5.0,
            spot_check_seed: None,
        }
    }
}

/// Quality gate thresholds applied between stages and at aggregation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Critical gate: validator CRITICAL count above this fails the run outright
    pub max_critical_errors: usize,
    /// Warning gate and aggregated HIGH ceiling
    pub max_high_issues: usize,
    /// Minimum overall confidence, 0-100 scale
    pub min_confidence: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_critical_errors: 0,
            max_high_issues: 5,
            min_confidence: 95.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = QaConfig::default();
        assert!(config.validator.allow_two_group_codes);
        assert_eq!(config.validator.min_title_length, 2);
        assert_eq!(config.validator.max_title_length, 200);
        assert_eq!(config.auditor.max_high_issues, 5);
        assert!((config.quality.confidence_threshold - 0.95).abs() < f64::EPSILON);
        assert_eq!(config.gates.max_critical_errors, 0);
        assert!((config.gates.min_confidence - 95.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_fields() {
        let config: QaConfig = toml::from_str(
            r#"
            [validator]
            min_title_length = 5

            [quality]
            spot_check_seed = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.validator.min_title_length, 5);
        assert_eq!(config.validator.max_title_length, 200);
        assert_eq!(config.quality.spot_check_seed, Some(42));
        assert_eq!(config.gates.max_high_issues, 5);
    }

    #[test]
    fn missing_config_file_fails_fast() {
        let err = QaConfig::load(Path::new("/nonexistent/catalog_qa.toml")).unwrap_err();
        assert!(matches!(err, QaError::Config(_)));
    }
}
