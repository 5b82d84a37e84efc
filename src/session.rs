//! Serialized comparison session for the host application.
//!
//! A session bundles both label assignments, the comparison metrics and an
//! optional calibration summary with a freshly minted id and timestamp.
//! Field order follows the struct definitions and every map is ordered, so
//! two runs over the same input differ only in `session_id` and
//! `created_at`.
//!
//! ```
//! use u_layer_eval::features::{LabelAssignment, SampleSet};
//! use u_layer_eval::report::ComparisonReportBuilder;
//! use u_layer_eval::session::ComparisonSession;
//!
//! let labels = LabelAssignment::from_groups(&[vec!["a", "b"], vec!["c"]]);
//! let metrics = ComparisonReportBuilder::new()
//!     .build(&labels, &labels, &SampleSet::default())
//!     .unwrap();
//! let session = ComparisonSession::new(labels.clone(), labels, metrics);
//!
//! let json = session.to_json().unwrap();
//! let back = ComparisonSession::from_json(&json).unwrap();
//! assert_eq!(back.metrics, session.metrics);
//! assert_eq!(back.session_id, session.session_id);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calibrate::CalibrationSummary;
use crate::error::EvalError;
use crate::features::LabelAssignment;
use crate::report::ComparisonMetrics;

/// One persisted comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSession {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Analysis window length the automatic grouping was computed with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_len: Option<usize>,
    pub manual: LabelAssignment,
    pub automatic: LabelAssignment,
    pub metrics: ComparisonMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationSummary>,
}

impl ComparisonSession {
    /// Wraps a comparison with a new v4 id and the current UTC time.
    pub fn new(
        manual: LabelAssignment,
        automatic: LabelAssignment,
        metrics: ComparisonMetrics,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
            window_len: None,
            manual,
            automatic,
            metrics,
            calibration: None,
        }
    }

    pub fn with_window_len(mut self, window_len: usize) -> Self {
        self.window_len = Some(window_len);
        self
    }

    pub fn with_calibration(mut self, summary: CalibrationSummary) -> Self {
        self.calibration = Some(summary);
        self
    }

    /// Pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String, EvalError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EvalError> {
        Ok(serde_json::from_str(json)?)
    }
}
