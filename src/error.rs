//! Error types for u-layer-eval.
//!
//! Metric computations are total and never fail on degenerate input; the
//! variants below cover configuration mistakes, cancellation, and decoding.

use thiserror::Error;

/// All errors produced by u-layer-eval operations.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A sample's feature vector does not match the corpus dimensionality.
    #[error("sample '{sample_id}': expected {expected} features, got {actual}")]
    DimensionMismatch {
        sample_id: String,
        expected: usize,
        actual: usize,
    },

    /// A feature vector contains NaN or infinity.
    #[error("sample '{sample_id}': feature {index} is not finite")]
    NonFiniteFeature { sample_id: String, index: usize },

    /// The same sample id was supplied twice.
    #[error("duplicate sample id '{id}'")]
    DuplicateSample { id: String },

    /// A parameter is outside its valid range.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    /// The caller raised the cancellation flag.
    #[error("operation cancelled")]
    Cancelled,

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An external collaborator (feature extraction, grouping) failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl EvalError {
    pub(crate) fn invalid(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }
}
