//! Engine configuration.
//!
//! Every struct carries the documented defaults and can be partially
//! overridden from JSON (missing fields fall back to the defaults).
//!
//! ```
//! use u_layer_eval::config::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{ "calibration": { "max_iterations": 4 } }"#).unwrap();
//! assert_eq!(config.calibration.max_iterations, 4);
//! assert_eq!(config.calibration.min_split_size, 4);
//! assert!((config.report.alignment.merge_share - 0.6).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

// ── Alignment thresholds ──────────────────────────────────────────────

/// Share thresholds used by merge and split detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentThresholds {
    /// Minimum share of a manual group inside one automatic cluster for the
    /// group to count toward a merge. Default: 0.6.
    pub merge_share: f64,
    /// A split is flagged only when the top share is below this. Default: 0.7.
    pub split_top_share_max: f64,
    /// A split is flagged only when the second share reaches this. Default: 0.3.
    pub split_second_share_min: f64,
}

impl Default for AlignmentThresholds {
    fn default() -> Self {
        Self {
            merge_share: 0.6,
            split_top_share_max: 0.7,
            split_second_share_min: 0.3,
        }
    }
}

impl AlignmentThresholds {
    /// Sets the merge share threshold.
    pub fn merge_share(mut self, share: f64) -> Self {
        self.merge_share = share;
        self
    }

    /// Sets the split top-share ceiling.
    pub fn split_top_share_max(mut self, share: f64) -> Self {
        self.split_top_share_max = share;
        self
    }

    /// Sets the split second-share floor.
    pub fn split_second_share_min(mut self, share: f64) -> Self {
        self.split_second_share_min = share;
        self
    }

    fn validate(&self) -> Result<(), EvalError> {
        for (name, value) in [
            ("merge_share", self.merge_share),
            ("split_top_share_max", self.split_top_share_max),
            ("split_second_share_min", self.split_second_share_min),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(EvalError::invalid(name, format!("must be in (0, 1], got {value}")));
            }
        }
        Ok(())
    }
}

// ── Report ────────────────────────────────────────────────────────────

/// Configuration for [`ComparisonReportBuilder`](crate::report::ComparisonReportBuilder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Merge/split thresholds.
    pub alignment: AlignmentThresholds,
    /// Probabilities are clamped to at least this before taking logs. Default: 1e-12.
    pub probability_floor: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            alignment: AlignmentThresholds::default(),
            probability_floor: 1e-12,
        }
    }
}

impl ReportConfig {
    /// Sets the alignment thresholds.
    pub fn alignment(mut self, alignment: AlignmentThresholds) -> Self {
        self.alignment = alignment;
        self
    }

    /// Sets the log-probability floor.
    pub fn probability_floor(mut self, floor: f64) -> Self {
        self.probability_floor = floor;
        self
    }

    /// Checks that every field is within its valid range.
    pub fn validate(&self) -> Result<(), EvalError> {
        self.alignment.validate()?;
        if !(self.probability_floor > 0.0 && self.probability_floor < 1.0) {
            return Err(EvalError::invalid(
                "probability_floor",
                format!("must be in (0, 1), got {}", self.probability_floor),
            ));
        }
        Ok(())
    }
}

// ── Calibration ───────────────────────────────────────────────────────

/// Configuration for [`KCalibrator`](crate::calibrate::KCalibrator).
///
/// Composite quality is
/// `silhouette + max(0, 1 - min(DB, db_cap)) * db_weight + min(CH / ch_scale, ch_cap)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Maximum split/merge steps. Default: 10.
    pub max_iterations: usize,
    /// Maximum assign/update rounds of the local bisecting k-means. Default: 10.
    pub kmeans_max_iter: usize,
    /// Clusters smaller than this are never split. Default: 4.
    pub min_split_size: usize,
    /// Weight of the Davies-Bouldin term. Default: 0.2.
    pub db_weight: f64,
    /// Davies-Bouldin values above this are clamped. Default: 2.0.
    pub db_cap: f64,
    /// Calinski-Harabasz divisor. Default: 1000.
    pub ch_scale: f64,
    /// Upper bound of the Calinski-Harabasz term. Default: 0.2.
    pub ch_cap: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            kmeans_max_iter: 10,
            min_split_size: 4,
            db_weight: 0.2,
            db_cap: 2.0,
            ch_scale: 1000.0,
            ch_cap: 0.2,
        }
    }
}

impl CalibrationConfig {
    /// Sets the iteration cap.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the k-means round cap.
    pub fn kmeans_max_iter(mut self, kmeans_max_iter: usize) -> Self {
        self.kmeans_max_iter = kmeans_max_iter;
        self
    }

    /// Sets the minimum cluster size eligible for splitting.
    pub fn min_split_size(mut self, min_split_size: usize) -> Self {
        self.min_split_size = min_split_size;
        self
    }

    /// Checks that every field is within its valid range.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.max_iterations == 0 {
            return Err(EvalError::invalid("max_iterations", "must be at least 1"));
        }
        if self.kmeans_max_iter == 0 {
            return Err(EvalError::invalid("kmeans_max_iter", "must be at least 1"));
        }
        if self.min_split_size < 2 {
            return Err(EvalError::invalid(
                "min_split_size",
                format!("must be at least 2, got {}", self.min_split_size),
            ));
        }
        for (name, value) in [("db_cap", self.db_cap), ("ch_scale", self.ch_scale)] {
            if !(value > 0.0) {
                return Err(EvalError::invalid(name, format!("must be positive, got {value}")));
            }
        }
        for (name, value) in [("db_weight", self.db_weight), ("ch_cap", self.ch_cap)] {
            if !(value >= 0.0) {
                return Err(EvalError::invalid(name, format!("must be non-negative, got {value}")));
            }
        }
        Ok(())
    }
}

// ── Engine ────────────────────────────────────────────────────────────

/// Top-level configuration grouping report and calibration settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub report: ReportConfig,
    pub calibration: CalibrationConfig,
}

impl EngineConfig {
    /// Parses a (possibly partial) JSON document and validates it.
    pub fn from_json(json: &str) -> Result<Self, EvalError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks both sections.
    pub fn validate(&self) -> Result<(), EvalError> {
        self.report.validate()?;
        self.calibration.validate()
    }
}
