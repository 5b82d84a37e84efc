//! Samples, label assignments, and the collaborator interfaces that feed them.
//!
//! The engine never extracts audio features itself. A [`FeatureExtractor`]
//! turns a segment into [`SegmentFeatures`], a [`FeatureNormalizer`] puts
//! the corpus on a common scale, and an [`AutoGrouper`] produces the
//! automatic partition. Everything downstream consumes the in-memory
//! [`SampleSet`] and [`LabelAssignment`] values defined here.
//!
//! ```
//! use u_layer_eval::features::{LabelAssignment, Sample, SampleSet};
//!
//! let samples = SampleSet::new(vec![
//!     Sample::new("snare_01", vec![0.1, 0.2]),
//!     Sample::new("snare_02", vec![0.2, 0.1]),
//! ]).unwrap();
//! assert_eq!(samples.dimension(), Some(2));
//!
//! let groups = vec![vec!["snare_01".to_string()], vec!["snare_02".to_string()]];
//! let labels = LabelAssignment::from_groups(&groups);
//! assert_eq!(labels.get("snare_02"), Some(1));
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Cluster label. Labels need not be contiguous.
pub type ClusterLabel = u32;

// ── Features ──────────────────────────────────────────────────────────

/// Scalar descriptors carried with a sample for reporting only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFeatures {
    pub rms: f64,
    pub spectral_centroid_hz: f64,
    pub spectral_rolloff_hz: f64,
    pub spectral_bandwidth_hz: f64,
    pub spectral_flatness: f64,
    pub zero_crossing_rate: f64,
}

/// Output of the feature-extraction collaborator for one audio segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentFeatures {
    pub rms: f64,
    pub spectral_centroid_hz: f64,
    pub spectral_rolloff_hz: f64,
    pub spectral_bandwidth_hz: f64,
    pub spectral_flatness: f64,
    pub zero_crossing_rate: f64,
    pub timbre_vector: Vec<f64>,
}

impl SegmentFeatures {
    fn scalars(&self) -> [f64; 6] {
        [
            self.rms,
            self.spectral_centroid_hz,
            self.spectral_rolloff_hz,
            self.spectral_bandwidth_hz,
            self.spectral_flatness,
            self.zero_crossing_rate,
        ]
    }

    fn with_scalars(&self, s: [f64; 6], timbre_vector: Vec<f64>) -> Self {
        Self {
            rms: s[0],
            spectral_centroid_hz: s[1],
            spectral_rolloff_hz: s[2],
            spectral_bandwidth_hz: s[3],
            spectral_flatness: s[4],
            zero_crossing_rate: s[5],
            timbre_vector,
        }
    }

    /// The scalar descriptors without the timbre vector.
    pub fn raw(&self) -> RawFeatures {
        RawFeatures {
            rms: self.rms,
            spectral_centroid_hz: self.spectral_centroid_hz,
            spectral_rolloff_hz: self.spectral_rolloff_hz,
            spectral_bandwidth_hz: self.spectral_bandwidth_hz,
            spectral_flatness: self.spectral_flatness,
            zero_crossing_rate: self.zero_crossing_rate,
        }
    }

    /// Distance-space vector: the six scalars followed by the timbre vector.
    pub fn feature_vector(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(6 + self.timbre_vector.len());
        v.extend_from_slice(&self.scalars());
        v.extend_from_slice(&self.timbre_vector);
        v
    }
}

// ── Collaborators ─────────────────────────────────────────────────────

/// Computes descriptors for one audio segment.
pub trait FeatureExtractor {
    fn extract(
        &self,
        samples: &[f32],
        sample_rate: u32,
        window_len: usize,
    ) -> Result<SegmentFeatures, EvalError>;
}

/// Rescales a corpus of descriptors, preserving their shape.
pub trait FeatureNormalizer {
    fn normalize(&self, features: &[SegmentFeatures]) -> Vec<SegmentFeatures>;
}

/// Produces the automatic partition of segment ids.
pub trait AutoGrouper {
    fn group(&self, ids: &[String], window_len: usize) -> Result<Vec<Vec<String>>, EvalError>;
}

/// Z-score normalization per scalar field and per timbre dimension.
///
/// A field with zero or undefined standard deviation normalizes to 0.
/// Timbre vectors shorter than the longest one are normalized over the
/// dimensions they have.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZScoreNormalizer;

impl ZScoreNormalizer {
    fn zscores(values: &[f64]) -> Vec<f64> {
        let mean = u_numflow::stats::mean(values).unwrap_or(0.0);
        let sd = u_numflow::stats::std_dev(values).unwrap_or(0.0);
        values
            .iter()
            .map(|&v| {
                if sd > 0.0 && sd.is_finite() {
                    (v - mean) / sd
                } else {
                    0.0
                }
            })
            .collect()
    }
}

impl FeatureNormalizer for ZScoreNormalizer {
    fn normalize(&self, features: &[SegmentFeatures]) -> Vec<SegmentFeatures> {
        if features.is_empty() {
            return Vec::new();
        }

        let mut scalars: Vec<[f64; 6]> = vec![[0.0; 6]; features.len()];
        for field in 0..6 {
            let column: Vec<f64> = features.iter().map(|f| f.scalars()[field]).collect();
            for (row, z) in Self::zscores(&column).into_iter().enumerate() {
                scalars[row][field] = z;
            }
        }

        let max_dim = features.iter().map(|f| f.timbre_vector.len()).max().unwrap_or(0);
        let mut timbre: Vec<Vec<f64>> = features
            .iter()
            .map(|f| vec![0.0; f.timbre_vector.len()])
            .collect();
        for dim in 0..max_dim {
            let rows: Vec<usize> = (0..features.len())
                .filter(|&r| dim < features[r].timbre_vector.len())
                .collect();
            let column: Vec<f64> = rows.iter().map(|&r| features[r].timbre_vector[dim]).collect();
            for (&row, z) in rows.iter().zip(Self::zscores(&column)) {
                timbre[row][dim] = z;
            }
        }

        features
            .iter()
            .zip(scalars)
            .zip(timbre)
            .map(|((f, s), t)| f.with_scalars(s, t))
            .collect()
    }
}

// ── Samples ───────────────────────────────────────────────────────────

/// One transient-bounded audio region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    /// Normalized feature vector; empty means "no vector".
    #[serde(default)]
    pub vector: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawFeatures>,
}

impl Sample {
    /// Creates a sample with a feature vector and no raw descriptors.
    pub fn new(id: impl Into<String>, vector: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            vector,
            raw: None,
        }
    }

    /// Builds a sample from normalized collaborator output, keeping the
    /// un-normalized descriptors for reporting.
    pub fn from_features(
        id: impl Into<String>,
        normalized: &SegmentFeatures,
        raw: Option<&SegmentFeatures>,
    ) -> Self {
        Self {
            id: id.into(),
            vector: normalized.feature_vector(),
            raw: raw.map(SegmentFeatures::raw),
        }
    }
}

/// Validated collection of samples keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    samples: BTreeMap<String, Sample>,
    dimension: Option<usize>,
}

impl SampleSet {
    /// Validates and indexes `samples`.
    ///
    /// Fails on duplicate ids, on non-empty vectors whose length differs from
    /// the first non-empty vector, and on NaN or infinite values.
    pub fn new(samples: Vec<Sample>) -> Result<Self, EvalError> {
        let mut map = BTreeMap::new();
        let mut dimension: Option<usize> = None;

        for sample in samples {
            if !sample.vector.is_empty() {
                match dimension {
                    None => dimension = Some(sample.vector.len()),
                    Some(d) if d != sample.vector.len() => {
                        return Err(EvalError::DimensionMismatch {
                            sample_id: sample.id,
                            expected: d,
                            actual: sample.vector.len(),
                        });
                    }
                    Some(_) => {}
                }
                if let Some(index) = sample.vector.iter().position(|v| !v.is_finite()) {
                    return Err(EvalError::NonFiniteFeature {
                        sample_id: sample.id,
                        index,
                    });
                }
            }
            if map.contains_key(&sample.id) {
                return Err(EvalError::DuplicateSample { id: sample.id });
            }
            map.insert(sample.id.clone(), sample);
        }

        Ok(Self {
            samples: map,
            dimension,
        })
    }

    /// Convenience constructor from `(id, vector)` pairs.
    pub fn from_vectors<I, S>(vectors: I) -> Result<Self, EvalError>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        Self::new(
            vectors
                .into_iter()
                .map(|(id, v)| Sample::new(id, v))
                .collect(),
        )
    }

    /// Shared dimensionality of all non-empty vectors.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn get(&self, id: &str) -> Option<&Sample> {
        self.samples.get(id)
    }

    /// The sample's feature vector, or `None` when absent or empty.
    pub fn vector(&self, id: &str) -> Option<&[f64]> {
        self.samples
            .get(id)
            .map(|s| s.vector.as_slice())
            .filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterates samples in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.values()
    }
}

// ── Label assignments ─────────────────────────────────────────────────

/// Mapping from sample id to cluster label, iterated in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelAssignment {
    labels: BTreeMap<String, ClusterLabel>,
}

impl LabelAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a partition into labels; group `i` gets label `i`.
    /// An id listed in several groups keeps the last one.
    pub fn from_groups<S: AsRef<str>>(groups: &[Vec<S>]) -> Self {
        let mut labels = BTreeMap::new();
        for (label, group) in groups.iter().enumerate() {
            for id in group {
                labels.insert(id.as_ref().to_string(), label as ClusterLabel);
            }
        }
        Self { labels }
    }

    /// Inserts or replaces a label, returning the previous one.
    pub fn insert(&mut self, id: impl Into<String>, label: ClusterLabel) -> Option<ClusterLabel> {
        self.labels.insert(id.into(), label)
    }

    pub fn get(&self, id: &str) -> Option<ClusterLabel> {
        self.labels.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.labels.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterates `(id, label)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ClusterLabel)> {
        self.labels.iter().map(|(id, &l)| (id.as_str(), l))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    /// Sorted distinct labels.
    pub fn distinct_labels(&self) -> Vec<ClusterLabel> {
        let set: BTreeSet<ClusterLabel> = self.labels.values().copied().collect();
        set.into_iter().collect()
    }

    pub fn cluster_count(&self) -> usize {
        self.distinct_labels().len()
    }

    /// Members per label, ids in order.
    pub fn groups(&self) -> BTreeMap<ClusterLabel, Vec<String>> {
        let mut groups: BTreeMap<ClusterLabel, Vec<String>> = BTreeMap::new();
        for (id, &label) in &self.labels {
            groups.entry(label).or_default().push(id.clone());
        }
        groups
    }
}

impl<S: Into<String>> FromIterator<(S, ClusterLabel)> for LabelAssignment {
    fn from_iter<T: IntoIterator<Item = (S, ClusterLabel)>>(iter: T) -> Self {
        Self {
            labels: iter.into_iter().map(|(id, l)| (id.into(), l)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(rms: f64, timbre: Vec<f64>) -> SegmentFeatures {
        SegmentFeatures {
            rms,
            spectral_centroid_hz: 1000.0 + rms,
            spectral_rolloff_hz: 4000.0,
            spectral_bandwidth_hz: 1500.0,
            spectral_flatness: 0.1,
            zero_crossing_rate: 0.05,
            timbre_vector: timbre,
        }
    }

    // ── SampleSet ────────────────────────────────────────────────

    #[test]
    fn sample_set_rejects_dimension_mismatch() {
        let err = SampleSet::from_vectors(vec![("a", vec![1.0, 2.0]), ("b", vec![1.0])]);
        match err {
            Err(EvalError::DimensionMismatch {
                sample_id,
                expected,
                actual,
            }) => {
                assert_eq!(sample_id, "b");
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn sample_set_rejects_nan() {
        let err = SampleSet::from_vectors(vec![("a", vec![1.0, f64::NAN])]);
        assert!(matches!(err, Err(EvalError::NonFiniteFeature { index: 1, .. })));
    }

    #[test]
    fn sample_set_rejects_duplicates() {
        let err = SampleSet::from_vectors(vec![("a", vec![1.0]), ("a", vec![2.0])]);
        assert!(matches!(err, Err(EvalError::DuplicateSample { .. })));
    }

    #[test]
    fn empty_vector_means_no_vector() {
        let set = SampleSet::from_vectors(vec![("a", vec![1.0, 2.0]), ("b", vec![])]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.dimension(), Some(2));
        assert!(set.vector("a").is_some());
        assert!(set.vector("b").is_none());
        assert!(set.vector("missing").is_none());
    }

    // ── LabelAssignment ──────────────────────────────────────────

    #[test]
    fn from_groups_assigns_group_index() {
        let groups = vec![vec!["s1", "s2"], vec!["s3"]];
        let labels = LabelAssignment::from_groups(&groups);
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get("s1"), Some(0));
        assert_eq!(labels.get("s3"), Some(1));
        assert_eq!(labels.distinct_labels(), vec![0, 1]);
        assert_eq!(labels.cluster_count(), 2);
    }

    #[test]
    fn groups_are_sorted() {
        let labels: LabelAssignment = vec![("b", 7), ("a", 7), ("c", 2)].into_iter().collect();
        let groups = labels.groups();
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![2, 7]);
        assert_eq!(groups[&7], vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn label_assignment_serializes_as_map() {
        let labels: LabelAssignment = vec![("b", 1), ("a", 0)].into_iter().collect();
        let json = serde_json::to_string(&labels).unwrap();
        assert_eq!(json, r#"{"a":0,"b":1}"#);
    }

    // ── Features ─────────────────────────────────────────────────

    #[test]
    fn feature_vector_layout() {
        let f = features(0.5, vec![9.0, 8.0]);
        let v = f.feature_vector();
        assert_eq!(v.len(), 8);
        assert_eq!(v[0], 0.5);
        assert_eq!(v[1], 1000.5);
        assert_eq!(&v[6..], &[9.0, 8.0]);
    }

    #[test]
    fn sample_from_features_keeps_raw() {
        let raw = features(0.5, vec![1.0]);
        let norm = features(-1.0, vec![0.0]);
        let s = Sample::from_features("x", &norm, Some(&raw));
        assert_eq!(s.vector[0], -1.0);
        assert_eq!(s.raw.unwrap().rms, 0.5);
    }

    #[test]
    fn zscore_normalizer_centers_fields() {
        let input = vec![
            features(1.0, vec![2.0, 5.0]),
            features(2.0, vec![4.0, 5.0]),
            features(3.0, vec![6.0, 5.0]),
        ];
        let out = ZScoreNormalizer.normalize(&input);
        assert_eq!(out.len(), 3);

        let rms: Vec<f64> = out.iter().map(|f| f.rms).collect();
        assert!(rms[0] < 0.0 && rms[2] > 0.0);
        assert!(rms[1].abs() < 1e-12);
        assert!((rms[0] + rms[2]).abs() < 1e-12);

        // Constant field normalizes to zero
        assert!(out.iter().all(|f| f.spectral_rolloff_hz == 0.0));
        assert!(out.iter().all(|f| f.timbre_vector[1] == 0.0));
        assert_eq!(out[0].timbre_vector.len(), 2);
    }

    #[test]
    fn zscore_normalizer_empty() {
        assert!(ZScoreNormalizer.normalize(&[]).is_empty());
    }
}
