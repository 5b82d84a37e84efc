//! K-calibration: drive the automatic cluster count toward a target.
//!
//! Starting from an automatic labeling, each step either splits the cluster
//! with the lowest silhouette (local bisecting k-means, when below target)
//! or commits the pairwise merge with the best composite quality (when above
//! target). Every step produces a fresh [`ClusteringState`]; the previous one
//! is never mutated. The loop ends when the target is reached or after
//! `max_iterations` steps, so it always terminates.
//!
//! Composite quality:
//!
//! ```text
//! silhouette + max(0, 1 - min(DB, 2)) · 0.2 + min(CH / 1000, 0.2)
//! ```
//!
//! # Example
//!
//! ```
//! use u_layer_eval::calibrate::KCalibrator;
//! use u_layer_eval::features::{LabelAssignment, SampleSet};
//!
//! let samples = SampleSet::from_vectors(vec![
//!     ("a1", vec![0.0, 0.0]), ("a2", vec![0.1, 0.0]), ("a3", vec![0.0, 0.1]), ("a4", vec![0.1, 0.1]),
//!     ("b1", vec![9.0, 9.0]), ("b2", vec![9.1, 9.0]), ("b3", vec![9.0, 9.1]), ("b4", vec![9.1, 9.1]),
//! ]).unwrap();
//! // Everything starts in one cluster
//! let automatic: LabelAssignment = samples.iter().map(|s| (s.id.clone(), 0)).collect();
//!
//! let outcome = KCalibrator::new().calibrate_to_k(&automatic, &samples, 2).unwrap();
//! assert!(outcome.reached_target);
//! assert_eq!(outcome.labels.cluster_count(), 2);
//! assert_eq!(outcome.labels.get("a1"), outcome.labels.get("a4"));
//! assert_ne!(outcome.labels.get("a1"), outcome.labels.get("b1"));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ambiguity::centroids_by_label;
use crate::cancel::{self, CancelFlag};
use crate::config::CalibrationConfig;
use crate::distance::{centroid, euclidean_dist, DistanceMatrix};
use crate::error::EvalError;
use crate::features::{ClusterLabel, LabelAssignment, SampleSet};
use crate::internal::InternalScores;

// ── Quality ───────────────────────────────────────────────────────────

/// Internal quality of one labeling plus the composite objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub cluster_count: usize,
    pub silhouette: f64,
    pub davies_bouldin: f64,
    pub calinski_harabasz: f64,
    pub composite: f64,
}

impl QualitySnapshot {
    fn from_scores(scores: &InternalScores, config: &CalibrationConfig) -> Self {
        let db_term = (1.0 - scores.davies_bouldin.min(config.db_cap)).max(0.0) * config.db_weight;
        let ch_term = (scores.calinski_harabasz / config.ch_scale).min(config.ch_cap);
        Self {
            cluster_count: scores.cluster_count,
            silhouette: scores.silhouette,
            davies_bouldin: scores.davies_bouldin,
            calinski_harabasz: scores.calinski_harabasz,
            composite: scores.silhouette + db_term + ch_term,
        }
    }
}

// ── State ─────────────────────────────────────────────────────────────

/// Working value of the calibrator.
///
/// Vectors and their distance matrix never change during calibration and
/// are shared between states; labels, centroids and quality are owned.
#[derive(Debug, Clone)]
pub struct ClusteringState {
    ids: Arc<Vec<String>>,
    vectors: Arc<Vec<Vec<f64>>>,
    distances: Arc<DistanceMatrix>,
    labels: Vec<ClusterLabel>,
    centroids: BTreeMap<ClusterLabel, Vec<f64>>,
    silhouette_per_cluster: BTreeMap<ClusterLabel, f64>,
    quality: QualitySnapshot,
}

impl ClusteringState {
    /// Builds the initial state, computing the distance matrix once.
    pub fn new(
        ids: Vec<String>,
        vectors: Vec<Vec<f64>>,
        labels: Vec<ClusterLabel>,
        config: &CalibrationConfig,
        cancel: Option<&CancelFlag>,
    ) -> Result<Self, EvalError> {
        if ids.len() != vectors.len() || labels.len() != vectors.len() {
            return Err(EvalError::invalid(
                "labels",
                format!(
                    "{} ids, {} vectors and {} labels must have equal length",
                    ids.len(),
                    vectors.len(),
                    labels.len()
                ),
            ));
        }
        let distances = DistanceMatrix::compute(&vectors, cancel)?;
        Ok(Self::recompute(
            Arc::new(ids),
            Arc::new(vectors),
            Arc::new(distances),
            labels,
            config,
        ))
    }

    fn recompute(
        ids: Arc<Vec<String>>,
        vectors: Arc<Vec<Vec<f64>>>,
        distances: Arc<DistanceMatrix>,
        labels: Vec<ClusterLabel>,
        config: &CalibrationConfig,
    ) -> Self {
        let scores = InternalScores::compute(&vectors, &labels, &distances);
        Self {
            centroids: centroids_by_label(&vectors, &labels),
            quality: QualitySnapshot::from_scores(&scores, config),
            silhouette_per_cluster: scores.silhouette_per_cluster,
            ids,
            vectors,
            distances,
            labels,
        }
    }

    /// A new state with `labels` over the same vectors.
    fn with_labels(&self, labels: Vec<ClusterLabel>, config: &CalibrationConfig) -> Self {
        Self::recompute(
            Arc::clone(&self.ids),
            Arc::clone(&self.vectors),
            Arc::clone(&self.distances),
            labels,
            config,
        )
    }

    /// A new state where every `from` label becomes `into`.
    fn merged(&self, from: ClusterLabel, into: ClusterLabel, config: &CalibrationConfig) -> Self {
        let labels = self
            .labels
            .iter()
            .map(|&l| if l == from { into } else { l })
            .collect();
        self.with_labels(labels, config)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn labels(&self) -> &[ClusterLabel] {
        &self.labels
    }

    pub fn centroids(&self) -> &BTreeMap<ClusterLabel, Vec<f64>> {
        &self.centroids
    }

    pub fn silhouette_per_cluster(&self) -> &BTreeMap<ClusterLabel, f64> {
        &self.silhouette_per_cluster
    }

    pub fn quality(&self) -> QualitySnapshot {
        self.quality
    }

    /// Distinct labels among the vector-bearing samples.
    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }
}

// ── Local bisecting k-means ───────────────────────────────────────────

/// Splits `vectors` in two with Lloyd iterations.
///
/// Seeds are the two vectors farthest apart (first pair found wins ties).
/// A vector equidistant from both centroids goes to cluster 0. Stops after
/// `max_iter` rounds or once no assignment changes. Returns 0/1 per vector;
/// fewer than two vectors all get 0.
///
/// ```
/// use u_layer_eval::calibrate::local_bisecting_kmeans;
///
/// let v = vec![vec![0.0], vec![1.0], vec![10.0], vec![11.0]];
/// let refs: Vec<&[f64]> = v.iter().map(|x| x.as_slice()).collect();
/// assert_eq!(local_bisecting_kmeans(&refs, 10), vec![0, 0, 1, 1]);
/// ```
pub fn local_bisecting_kmeans(vectors: &[&[f64]], max_iter: usize) -> Vec<usize> {
    let n = vectors.len();
    if n < 2 {
        return vec![0; n];
    }

    let (mut seed_a, mut seed_b, mut best) = (0, 1, f64::NEG_INFINITY);
    for i in 0..n {
        for j in (i + 1)..n {
            let d = euclidean_dist(vectors[i], vectors[j]);
            if d > best {
                best = d;
                seed_a = i;
                seed_b = j;
            }
        }
    }

    let mut centroids = [vectors[seed_a].to_vec(), vectors[seed_b].to_vec()];
    let mut assignment = vec![usize::MAX; n];

    for _ in 0..max_iter {
        let mut changed = false;
        for (i, v) in vectors.iter().enumerate() {
            let d0 = euclidean_dist(v, &centroids[0]);
            let d1 = euclidean_dist(v, &centroids[1]);
            let c = if d1 < d0 { 1 } else { 0 };
            if assignment[i] != c {
                assignment[i] = c;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (c, slot) in centroids.iter_mut().enumerate() {
            let members = vectors
                .iter()
                .zip(assignment.iter())
                .filter(|(_, &a)| a == c)
                .map(|(v, _)| *v);
            // Empty cluster: keep old centroid
            if let Some(m) = centroid(members) {
                *slot = m;
            }
        }
    }

    // max_iter == 0 leaves nothing assigned
    for a in &mut assignment {
        if *a == usize::MAX {
            *a = 0;
        }
    }
    assignment
}

/// One past the largest used label, or the lowest unused label when that
/// would overflow.
fn fresh_label(used: &BTreeSet<ClusterLabel>) -> Option<ClusterLabel> {
    match used.last() {
        None => Some(0),
        Some(&max) => max
            .checked_add(1)
            .or_else(|| (0..=ClusterLabel::MAX).find(|l| !used.contains(l))),
    }
}

// ── Outcome ───────────────────────────────────────────────────────────

/// What one calibration step did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CalibrationAction {
    /// `moved` members of `label` were relabeled to `new_label`.
    Split {
        label: ClusterLabel,
        new_label: ClusterLabel,
        moved: usize,
    },
    /// The weakest cluster could not be split (too small or inseparable).
    Stalled { label: Option<ClusterLabel>, size: usize },
    /// Every `from` label became `into`.
    Merge { from: ClusterLabel, into: ClusterLabel },
}

/// One entry of the calibration history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStep {
    pub iteration: usize,
    #[serde(flatten)]
    pub action: CalibrationAction,
    pub cluster_count: usize,
    pub composite: f64,
}

/// Result of [`KCalibrator::calibrate_to_k`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub target_k: usize,
    pub reached_target: bool,
    pub iterations: usize,
    /// Recalibrated labels for every input id.
    pub labels: LabelAssignment,
    pub centroids: BTreeMap<ClusterLabel, Vec<f64>>,
    pub initial_quality: QualitySnapshot,
    pub final_quality: QualitySnapshot,
    pub history: Vec<CalibrationStep>,
}

impl CalibrationOutcome {
    pub fn summary(&self) -> CalibrationSummary {
        CalibrationSummary {
            target_k: self.target_k,
            reached_target: self.reached_target,
            iterations: self.iterations,
            initial_quality: self.initial_quality,
            final_quality: self.final_quality,
        }
    }
}

/// Compact calibration record attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub target_k: usize,
    pub reached_target: bool,
    pub iterations: usize,
    pub initial_quality: QualitySnapshot,
    pub final_quality: QualitySnapshot,
}

// ── Calibrator ────────────────────────────────────────────────────────

/// Iterative split/merge calibrator.
#[derive(Debug, Clone, Default)]
pub struct KCalibrator {
    config: CalibrationConfig,
    cancel: Option<CancelFlag>,
}

impl KCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: CalibrationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Recalibrates `automatic` toward `target_k` clusters.
    ///
    /// Only samples with a feature vector take part in splits and quality
    /// scoring; the cluster count is taken over them. Ids without a vector
    /// keep their label and follow merges of it.
    pub fn calibrate_to_k(
        &self,
        automatic: &LabelAssignment,
        samples: &SampleSet,
        target_k: usize,
    ) -> Result<CalibrationOutcome, EvalError> {
        if target_k == 0 {
            return Err(EvalError::invalid("target_k", "must be at least 1"));
        }
        self.config.validate()?;

        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        let mut labels = Vec::new();
        let mut passthrough: BTreeMap<String, ClusterLabel> = BTreeMap::new();
        for (id, label) in automatic.iter() {
            match samples.vector(id) {
                Some(v) => {
                    ids.push(id.to_string());
                    vectors.push(v.to_vec());
                    labels.push(label);
                }
                None => {
                    passthrough.insert(id.to_string(), label);
                }
            }
        }

        let mut state =
            ClusteringState::new(ids, vectors, labels, &self.config, self.cancel.as_ref())?;
        let initial_quality = state.quality();
        let mut history = Vec::new();
        let mut iterations = 0;

        tracing::debug!(
            target_k,
            initial_k = state.cluster_count(),
            passthrough = passthrough.len(),
            "starting calibration"
        );

        while iterations < self.config.max_iterations {
            let k = state.cluster_count();
            if k == target_k {
                break;
            }
            iterations += 1;
            let (next, action) = self.step(&state, &mut passthrough, target_k)?;

            tracing::debug!(
                iteration = iterations,
                ?action,
                clusters = next.cluster_count(),
                composite = next.quality().composite,
                "calibration step"
            );
            history.push(CalibrationStep {
                iteration: iterations,
                action,
                cluster_count: next.cluster_count(),
                composite: next.quality().composite,
            });
            state = next;
        }

        let reached_target = state.cluster_count() == target_k;
        if !reached_target {
            tracing::debug!(
                target_k,
                final_k = state.cluster_count(),
                "iteration cap reached before target"
            );
        }

        let mut out: LabelAssignment = passthrough.into_iter().collect();
        for (id, &label) in state.ids().iter().zip(state.labels()) {
            out.insert(id.clone(), label);
        }

        Ok(CalibrationOutcome {
            target_k,
            reached_target,
            iterations,
            labels: out,
            centroids: state.centroids().clone(),
            initial_quality,
            final_quality: state.quality(),
            history,
        })
    }

    /// One split or merge toward `target_k`. Ids without a vector follow
    /// a merge of their label.
    fn step(
        &self,
        state: &ClusteringState,
        passthrough: &mut BTreeMap<String, ClusterLabel>,
        target_k: usize,
    ) -> Result<(ClusteringState, CalibrationAction), EvalError> {
        cancel::poll(self.cancel.as_ref())?;

        if state.cluster_count() < target_k {
            let reserved: BTreeSet<ClusterLabel> = passthrough.values().copied().collect();
            return Ok(self.split_step(state, &reserved));
        }

        let (next, action) = self.merge_step(state)?;
        if let CalibrationAction::Merge { from, into } = action {
            for label in passthrough.values_mut() {
                if *label == from {
                    *label = into;
                }
            }
        }
        Ok((next, action))
    }

    /// Splits the cluster with the lowest per-cluster silhouette.
    ///
    /// `reserved` holds labels in use outside the state; the new label
    /// avoids them.
    fn split_step(
        &self,
        state: &ClusteringState,
        reserved: &BTreeSet<ClusterLabel>,
    ) -> (ClusteringState, CalibrationAction) {
        let mut weakest: Option<(ClusterLabel, f64)> = None;
        for (&label, &sil) in state.silhouette_per_cluster() {
            if weakest.is_none_or(|(_, best)| sil < best) {
                weakest = Some((label, sil));
            }
        }
        let Some((label, _)) = weakest else {
            return (state.clone(), CalibrationAction::Stalled { label: None, size: 0 });
        };

        let members: Vec<usize> = state
            .labels()
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == label)
            .map(|(i, _)| i)
            .collect();
        if members.len() < self.config.min_split_size {
            tracing::debug!(label, size = members.len(), "cluster too small to split");
            return (
                state.clone(),
                CalibrationAction::Stalled {
                    label: Some(label),
                    size: members.len(),
                },
            );
        }

        let member_vectors: Vec<&[f64]> = members
            .iter()
            .map(|&i| state.vectors[i].as_slice())
            .collect();
        let halves = local_bisecting_kmeans(&member_vectors, self.config.kmeans_max_iter);

        let mut used = reserved.clone();
        used.extend(state.labels().iter().copied());
        let Some(new_label) = fresh_label(&used) else {
            tracing::debug!(label, "no free cluster label left");
            return (
                state.clone(),
                CalibrationAction::Stalled {
                    label: Some(label),
                    size: members.len(),
                },
            );
        };

        let mut labels = state.labels().to_vec();
        let mut moved = 0;
        for (&i, &half) in members.iter().zip(halves.iter()) {
            if half == 1 {
                labels[i] = new_label;
                moved += 1;
            }
        }
        if moved == 0 {
            tracing::debug!(label, "bisection left the cluster whole");
            return (
                state.clone(),
                CalibrationAction::Stalled {
                    label: Some(label),
                    size: members.len(),
                },
            );
        }

        (
            state.with_labels(labels, &self.config),
            CalibrationAction::Split {
                label,
                new_label,
                moved,
            },
        )
    }

    /// Tries every pairwise merge and commits the best composite.
    fn merge_step(
        &self,
        state: &ClusteringState,
    ) -> Result<(ClusteringState, CalibrationAction), EvalError> {
        let labels: Vec<ClusterLabel> = state.centroids().keys().copied().collect();
        let mut best: Option<(ClusteringState, ClusterLabel, ClusterLabel)> = None;

        for (i, &into) in labels.iter().enumerate() {
            cancel::poll(self.cancel.as_ref())?;
            for &from in &labels[i + 1..] {
                let candidate = state.merged(from, into, &self.config);
                let composite = candidate.quality().composite;
                tracing::trace!(from, into, composite, "merge candidate");
                let better = best
                    .as_ref()
                    .is_none_or(|(b, _, _)| candidate.quality().composite > b.quality().composite);
                if better {
                    best = Some((candidate, from, into));
                }
            }
        }

        match best {
            Some((next, from, into)) => Ok((next, CalibrationAction::Merge { from, into })),
            None => Ok((state.clone(), CalibrationAction::Stalled { label: None, size: 0 })),
        }
    }
}
