//! Internal validation: how well a labeling fits the feature geometry.
//!
//! Includes Silhouette (global and per cluster), the Davies-Bouldin index and
//! the Calinski-Harabasz index. The dense-label functions take cluster ids
//! `0..k`; [`InternalScores::compute`] maps arbitrary labels onto that range
//! in sorted order and maps the per-cluster results back.
//!
//! ```
//! use u_layer_eval::distance::DistanceMatrix;
//! use u_layer_eval::internal::silhouette;
//!
//! let data = vec![
//!     vec![0.0, 0.0], vec![0.5, 0.5],
//!     vec![10.0, 10.0], vec![10.5, 10.5],
//! ];
//! let dm = DistanceMatrix::compute(&data, None).unwrap();
//! let scores = silhouette(&dm, &[0, 0, 1, 1], 2);
//! assert!(scores.global > 0.9); // well-separated clusters
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelFlag;
use crate::distance::{dense_centroids, euclidean_dist, euclidean_dist_sq, DistanceMatrix};
use crate::error::EvalError;
use crate::features::ClusterLabel;

// ── Results ───────────────────────────────────────────────────────────

/// Silhouette values for dense labels.
#[derive(Debug, Clone, PartialEq)]
pub struct SilhouetteScores {
    /// Mean over all samples.
    pub global: f64,
    /// Mean over each cluster's members, indexed by dense label.
    pub per_cluster: Vec<f64>,
    /// Per-sample values, in input order.
    pub samples: Vec<f64>,
}

/// Internal quality of one labeling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalScores {
    /// Distinct clusters among the points with vectors.
    pub cluster_count: usize,
    pub silhouette: f64,
    pub silhouette_per_cluster: BTreeMap<ClusterLabel, f64>,
    pub davies_bouldin: f64,
    pub calinski_harabasz: f64,
}

impl InternalScores {
    /// Computes all internal metrics for `points` labeled by `labels`.
    ///
    /// `dm` must be the distance matrix of `points`.
    pub fn compute(points: &[Vec<f64>], labels: &[ClusterLabel], dm: &DistanceMatrix) -> Self {
        debug_assert_eq!(points.len(), labels.len());
        debug_assert_eq!(points.len(), dm.len());

        let (distinct, dense) = densify(labels);
        let k = distinct.len();
        let sil = silhouette(dm, &dense, k);

        Self {
            cluster_count: k,
            silhouette: sil.global,
            silhouette_per_cluster: distinct.iter().copied().zip(sil.per_cluster).collect(),
            davies_bouldin: davies_bouldin(points, &dense, k),
            calinski_harabasz: calinski_harabasz(points, &dense, k),
        }
    }

    /// Like [`compute`](Self::compute) but builds the distance matrix itself.
    pub fn compute_with_cancel(
        points: &[Vec<f64>],
        labels: &[ClusterLabel],
        cancel: Option<&CancelFlag>,
    ) -> Result<Self, EvalError> {
        let dm = DistanceMatrix::compute(points, cancel)?;
        Ok(Self::compute(points, labels, &dm))
    }
}

/// Maps labels onto `0..k` in sorted label order.
pub fn densify(labels: &[ClusterLabel]) -> (Vec<ClusterLabel>, Vec<usize>) {
    let distinct: Vec<ClusterLabel> = labels
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let dense = labels
        .iter()
        .map(|l| distinct.binary_search(l).unwrap_or(0))
        .collect();
    (distinct, dense)
}

fn mean_or_zero(values: &[f64]) -> f64 {
    u_numflow::stats::mean(values).unwrap_or(0.0)
}

// ── Silhouette ────────────────────────────────────────────────────────

/// Silhouette coefficient (Rousseeuw, 1987) over a precomputed distance matrix.
///
/// For sample `i` in cluster `g`: `a(i)` is the mean distance to the other
/// members of `g` (0 for a singleton), `b(i)` the smallest mean distance to
/// any other non-empty cluster, and `s(i) = (b - a) / max(a, b)`. A sample
/// gets 0 when `max(a, b)` is 0 or when no other cluster exists.
pub fn silhouette(dm: &DistanceMatrix, labels: &[usize], k: usize) -> SilhouetteScores {
    let n = dm.len();
    let mut samples = vec![0.0f64; n];

    let mut sums = vec![0.0f64; k];
    let mut counts = vec![0usize; k];
    for c in labels {
        counts[*c] += 1;
    }

    for i in 0..n {
        let own = labels[i];

        sums.iter_mut().for_each(|s| *s = 0.0);
        for (j, &d) in dm.row(i).iter().enumerate() {
            if j != i {
                sums[labels[j]] += d;
            }
        }

        let a_i = if counts[own] > 1 {
            sums[own] / (counts[own] - 1) as f64
        } else {
            0.0
        };

        let mut b_i = f64::INFINITY;
        for c in 0..k {
            if c == own || counts[c] == 0 {
                continue;
            }
            b_i = b_i.min(sums[c] / counts[c] as f64);
        }

        if b_i.is_infinite() {
            // No other cluster to compare against
            continue;
        }

        let denom = a_i.max(b_i);
        if denom > 0.0 {
            samples[i] = (b_i - a_i) / denom;
        }
    }

    let per_cluster = (0..k)
        .map(|c| {
            let members: Vec<f64> = samples
                .iter()
                .zip(labels.iter())
                .filter(|(_, &l)| l == c)
                .map(|(&s, _)| s)
                .collect();
            mean_or_zero(&members)
        })
        .collect();

    SilhouetteScores {
        global: mean_or_zero(&samples),
        per_cluster,
        samples,
    }
}

// ── Calinski-Harabasz ─────────────────────────────────────────────────

/// Computes the Calinski-Harabasz index (variance ratio criterion).
///
/// `CH = (trace(B) / (k - 1)) / (trace(W) / (n - k))`. Higher values indicate
/// better-defined clusters.
///
/// # Returns
///
/// The CH score, or 0.0 unless `1 < k < n`, or when every cluster is a single
/// repeated point (zero within-cluster dispersion).
///
/// # Reference
///
/// Calinski & Harabasz (1974). "A dendrite method for cluster analysis."
pub fn calinski_harabasz(data: &[Vec<f64>], labels: &[usize], k: usize) -> f64 {
    let n = data.len();
    if k < 2 || n <= k {
        return 0.0;
    }

    let Some(global) = crate::distance::centroid(data.iter().map(|p| p.as_slice())) else {
        return 0.0;
    };
    let centroids = dense_centroids(data, labels, k);

    // Between-cluster dispersion
    let mut bcss = 0.0;
    for c in 0..k {
        if let Some(centroid) = &centroids[c] {
            let size = labels.iter().filter(|&&l| l == c).count();
            bcss += size as f64 * euclidean_dist_sq(centroid, &global);
        }
    }

    // Within-cluster dispersion
    let mut wcss = 0.0;
    for (point, &c) in data.iter().zip(labels.iter()) {
        if let Some(centroid) = &centroids[c] {
            wcss += euclidean_dist_sq(point, centroid);
        }
    }

    if wcss < 1e-300 {
        return 0.0;
    }

    (bcss / (k - 1) as f64) / (wcss / (n - k) as f64)
}

// ── Davies-Bouldin ────────────────────────────────────────────────────

/// Computes the Davies-Bouldin index. Lower values indicate better clustering.
///
/// Scatter `S_i` is the mean distance of cluster `i`'s members to its
/// centroid. `DB = (1/k) Σ_i max_{j≠i} (S_i + S_j) / d(c_i, c_j)`, where
/// pairs with coincident centroids are skipped and a cluster with no positive
/// ratio contributes 0.
///
/// # Returns
///
/// The DB score, or 0.0 if fewer than 2 clusters.
///
/// # Reference
///
/// Davies & Bouldin (1979). "A cluster separation measure."
pub fn davies_bouldin(data: &[Vec<f64>], labels: &[usize], k: usize) -> f64 {
    if k < 2 || data.is_empty() {
        return 0.0;
    }

    let centroids = dense_centroids(data, labels, k);

    let mut scatter = vec![0.0f64; k];
    let mut sizes = vec![0usize; k];
    for (point, &c) in data.iter().zip(labels.iter()) {
        if let Some(centroid) = &centroids[c] {
            scatter[c] += euclidean_dist(point, centroid);
            sizes[c] += 1;
        }
    }
    for c in 0..k {
        if sizes[c] > 0 {
            scatter[c] /= sizes[c] as f64;
        }
    }

    let present: Vec<usize> = (0..k).filter(|&c| centroids[c].is_some()).collect();
    if present.len() < 2 {
        return 0.0;
    }

    let mut db_sum = 0.0;
    for &i in &present {
        let mut max_ratio = 0.0f64;
        for &j in &present {
            if i == j {
                continue;
            }
            let (Some(ci), Some(cj)) = (&centroids[i], &centroids[j]) else {
                continue;
            };
            let centroid_dist = euclidean_dist(ci, cj);
            if centroid_dist <= 0.0 {
                continue;
            }
            max_ratio = max_ratio.max((scatter[i] + scatter[j]) / centroid_dist);
        }
        db_sum += max_ratio;
    }

    db_sum / present.len() as f64
}
