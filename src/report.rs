//! Comparison report: one immutable snapshot per manual/automatic comparison.
//!
//! [`ComparisonReportBuilder`] runs the contingency analysis once and feeds
//! it to the external metrics and the label aligner, computes internal
//! metrics for both labelings over the scored vector-bearing samples, ranks
//! per-sample ambiguity, and assembles everything into
//! [`ComparisonMetrics`]. Empty or degenerate input yields the documented
//! neutral values, never an error; the only failure modes are cancellation
//! and invalid configuration.
//!
//! ```
//! use u_layer_eval::features::{LabelAssignment, SampleSet};
//! use u_layer_eval::report::ComparisonReportBuilder;
//!
//! let samples = SampleSet::from_vectors(vec![
//!     ("s1", vec![0.0, 0.0]), ("s2", vec![0.1, 0.0]), ("s3", vec![0.0, 0.1]),
//!     ("s4", vec![5.0, 5.0]), ("s5", vec![5.1, 5.0]), ("s6", vec![5.0, 5.1]),
//! ]).unwrap();
//! let manual = LabelAssignment::from_groups(&[vec!["s1", "s2", "s3"], vec!["s4", "s5", "s6"]]);
//! let automatic = LabelAssignment::from_groups(&[vec!["s4", "s5", "s6"], vec!["s1", "s2", "s3"]]);
//!
//! let report = ComparisonReportBuilder::new().build(&manual, &automatic, &samples).unwrap();
//! assert!((report.external.ari - 1.0).abs() < 1e-12);
//! assert_eq!(report.alignment.mapped_accuracy, 1.0);
//! assert_eq!(report.samples.len(), 6);
//! assert!(report.samples.iter().all(|s| s.agrees));
//! ```

use serde::{Deserialize, Serialize};

use crate::alignment::{LabelAlignment, MergeFinding, SplitFinding};
use crate::ambiguity;
use crate::cancel::{self, CancelFlag};
use crate::config::ReportConfig;
use crate::contingency::{scored_samples, ContingencyTable};
use crate::distance::DistanceMatrix;
use crate::error::EvalError;
use crate::external::ExternalScores;
use crate::features::{ClusterLabel, LabelAssignment, RawFeatures, SampleSet};
use crate::internal::InternalScores;

// ── Non-finite floats ─────────────────────────────────────────────────

/// Serializes `f64` so that infinities and NaN survive a JSON round-trip.
pub(crate) mod non_finite {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if *value > 0.0 {
            serializer.serialize_str("Infinity")
        } else {
            serializer.serialize_str("-Infinity")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(s) => match s.as_str() {
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(D::Error::custom(format!("invalid float '{other}'"))),
            },
        }
    }
}

// ── Report types ──────────────────────────────────────────────────────

/// Per-sample comparison record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleComparison {
    pub sample_id: String,
    pub manual_label: ClusterLabel,
    pub automatic_label: ClusterLabel,
    /// Automatic cluster the manual label maps to under the majority mapping.
    pub mapped_automatic_label: Option<ClusterLabel>,
    /// `mapped_automatic_label == Some(automatic_label)`.
    pub agrees: bool,
    /// `None` when the sample has no feature vector.
    pub distance_to_manual_centroid: Option<f64>,
    pub distance_to_automatic_centroid: Option<f64>,
    pub nearest_cluster: Option<ClusterLabel>,
    pub second_nearest_cluster: Option<ClusterLabel>,
    /// Second-nearest over nearest centroid distance; infinite when undefined.
    #[serde(with = "non_finite")]
    pub margin: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawFeatures>,
}

/// Immutable result of one manual/automatic comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonMetrics {
    /// Samples labeled in both assignments.
    pub scored_count: usize,
    pub manual_count: usize,
    pub automatic_count: usize,
    /// Size of the union of both assignments' ids.
    pub union_count: usize,
    /// `scored_count / union_count`, 0 when both assignments are empty.
    pub coverage: f64,
    pub manual_cluster_count: usize,
    pub automatic_cluster_count: usize,
    pub external: ExternalScores,
    pub internal_manual: InternalScores,
    pub internal_automatic: InternalScores,
    /// Contingency table of the scored samples.
    pub confusion: ContingencyTable,
    pub alignment: LabelAlignment,
    pub samples: Vec<SampleComparison>,
}

impl ComparisonMetrics {
    pub fn merges(&self) -> &[MergeFinding] {
        &self.alignment.merges
    }

    pub fn splits(&self) -> &[SplitFinding] {
        &self.alignment.splits
    }

    /// One-line summary of the headline scores.
    ///
    /// ```
    /// use u_layer_eval::features::{LabelAssignment, SampleSet};
    /// use u_layer_eval::report::ComparisonReportBuilder;
    ///
    /// let labels = LabelAssignment::from_groups(&[vec!["a", "b"]]);
    /// let report = ComparisonReportBuilder::new()
    ///     .build(&labels, &labels, &SampleSet::default())
    ///     .unwrap();
    /// assert!(report.headline().starts_with("n=2 coverage=100.0%"));
    /// ```
    pub fn headline(&self) -> String {
        format!(
            "n={} coverage={:.1}% ARI={:.3} NMI={:.3} purity={:.3} V={:.3} B3-F1={:.3} \
             mapped={:.3} 1:1={:.3} gap={:+.3} silhouette={:.3}",
            self.scored_count,
            self.coverage * 100.0,
            self.external.ari,
            self.external.nmi,
            self.external.purity,
            self.external.v_measure,
            self.external.b_cubed.f1,
            self.alignment.mapped_accuracy,
            self.alignment.one_to_one_accuracy,
            self.alignment.accuracy_gap,
            self.internal_automatic.silhouette,
        )
    }

    /// Samples whose automatic cluster disagrees with their manual group's
    /// mapped cluster, farthest from their automatic centroid first.
    pub fn misclustered(&self, limit: usize) -> Vec<&SampleComparison> {
        let mut out: Vec<&SampleComparison> = self.samples.iter().filter(|s| !s.agrees).collect();
        out.sort_by(|a, b| {
            let da = a.distance_to_automatic_centroid.unwrap_or(f64::NEG_INFINITY);
            let db = b.distance_to_automatic_centroid.unwrap_or(f64::NEG_INFINITY);
            db.total_cmp(&da).then_with(|| a.sample_id.cmp(&b.sample_id))
        });
        out.truncate(limit);
        out
    }

    /// Samples with a finite margin, most ambiguous (smallest margin) first.
    pub fn ambiguous(&self, limit: usize) -> Vec<&SampleComparison> {
        let mut out: Vec<&SampleComparison> =
            self.samples.iter().filter(|s| s.margin.is_finite()).collect();
        out.sort_by(|a, b| {
            a.margin
                .total_cmp(&b.margin)
                .then_with(|| a.sample_id.cmp(&b.sample_id))
        });
        out.truncate(limit);
        out
    }
}

// ── Builder ───────────────────────────────────────────────────────────

/// Orchestrates contingency, external, internal, alignment and ambiguity
/// analysis into a [`ComparisonMetrics`].
#[derive(Debug, Clone, Default)]
pub struct ComparisonReportBuilder {
    config: ReportConfig,
    cancel: Option<CancelFlag>,
}

impl ComparisonReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ReportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Compares `automatic` against `manual` over the samples in both.
    ///
    /// Samples without a feature vector (or missing from `samples`) still
    /// count toward the external metrics and alignment, but not toward
    /// internal metrics or ambiguity.
    pub fn build(
        &self,
        manual: &LabelAssignment,
        automatic: &LabelAssignment,
        samples: &SampleSet,
    ) -> Result<ComparisonMetrics, EvalError> {
        self.config.validate()?;
        let cancel = self.cancel.as_ref();

        let table = ContingencyTable::build(manual, automatic);
        let scored = scored_samples(manual, automatic);
        let union_count = manual.len() + automatic.ids().filter(|id| !manual.contains(id)).count();
        tracing::debug!(
            scored = scored.len(),
            union = union_count,
            manual_clusters = table.n_rows(),
            automatic_clusters = table.n_cols(),
            "building comparison report"
        );

        let external = ExternalScores::compute(&table, self.config.probability_floor);
        let alignment = LabelAlignment::compute(&table, &self.config.alignment);
        cancel::poll(cancel)?;

        // Arena of vector-bearing scored samples
        let mut points: Vec<Vec<f64>> = Vec::new();
        let mut point_manual: Vec<ClusterLabel> = Vec::new();
        let mut point_auto: Vec<ClusterLabel> = Vec::new();
        let mut point_of: Vec<Option<usize>> = Vec::with_capacity(scored.len());
        for s in &scored {
            match samples.vector(&s.id) {
                Some(v) => {
                    point_of.push(Some(points.len()));
                    points.push(v.to_vec());
                    point_manual.push(s.manual);
                    point_auto.push(s.automatic);
                }
                None => point_of.push(None),
            }
        }
        if points.len() < scored.len() {
            tracing::debug!(
                missing = scored.len() - points.len(),
                "scored samples without feature vectors"
            );
        }

        let dm = DistanceMatrix::compute(&points, cancel)?;
        let internal_manual = InternalScores::compute(&points, &point_manual, &dm);
        let internal_automatic = InternalScores::compute(&points, &point_auto, &dm);
        cancel::poll(cancel)?;

        let ambiguity = ambiguity::analyze(&points, &point_manual, &point_auto);

        let sample_rows = scored
            .iter()
            .zip(point_of)
            .map(|(s, idx)| {
                let mapped = alignment.majority_mapping.get(&s.manual).copied();
                let amb = idx.map(|i| &ambiguity.samples[i]);
                SampleComparison {
                    sample_id: s.id.clone(),
                    manual_label: s.manual,
                    automatic_label: s.automatic,
                    mapped_automatic_label: mapped,
                    agrees: mapped == Some(s.automatic),
                    distance_to_manual_centroid: amb.map(|a| a.distance_to_manual_centroid),
                    distance_to_automatic_centroid: amb.map(|a| a.distance_to_automatic_centroid),
                    nearest_cluster: amb.and_then(|a| a.nearest),
                    second_nearest_cluster: amb.and_then(|a| a.second_nearest),
                    margin: amb.map_or(f64::INFINITY, |a| a.margin),
                    raw: samples.get(&s.id).and_then(|x| x.raw),
                }
            })
            .collect();

        let coverage = if union_count == 0 {
            0.0
        } else {
            scored.len() as f64 / union_count as f64
        };

        Ok(ComparisonMetrics {
            scored_count: scored.len(),
            manual_count: manual.len(),
            automatic_count: automatic.len(),
            union_count,
            coverage,
            manual_cluster_count: table.n_rows(),
            automatic_cluster_count: table.n_cols(),
            external,
            internal_manual,
            internal_automatic,
            confusion: table,
            alignment,
            samples: sample_rows,
        })
    }
}
