//! Euclidean geometry over feature vectors.
//!
//! Vectors are indexed by position (arena style) so the O(n²) pairwise pass
//! never hashes sample ids. Dimensionality is validated once by
//! [`SampleSet`](crate::features::SampleSet); the helpers here assume equal
//! lengths.

use crate::cancel::{self, CancelFlag};
use crate::error::EvalError;

// ── Distance helpers ──────────────────────────────────────────────────

#[inline]
pub fn euclidean_dist_sq(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "feature vectors must share dimensionality");
    a.iter()
        .zip(b.iter())
        .map(|(&ai, &bi)| {
            let diff = ai - bi;
            diff * diff
        })
        .sum()
}

#[inline]
pub fn euclidean_dist(a: &[f64], b: &[f64]) -> f64 {
    euclidean_dist_sq(a, b).sqrt()
}

/// Mean of the given points, or `None` when there are none.
pub fn centroid<'a, I>(points: I) -> Option<Vec<f64>>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut iter = points.into_iter();
    let first = iter.next()?;
    let mut sum = first.to_vec();
    let mut count = 1usize;
    for point in iter {
        for (s, &v) in sum.iter_mut().zip(point.iter()) {
            *s += v;
        }
        count += 1;
    }
    for s in &mut sum {
        *s /= count as f64;
    }
    Some(sum)
}

/// Per-cluster centroids for dense labels `0..k`. Empty clusters get `None`.
pub fn dense_centroids(data: &[Vec<f64>], labels: &[usize], k: usize) -> Vec<Option<Vec<f64>>> {
    (0..k)
        .map(|c| {
            centroid(
                data.iter()
                    .zip(labels.iter())
                    .filter(|(_, &l)| l == c)
                    .map(|(p, _)| p.as_slice()),
            )
        })
        .collect()
}

// ── Distance matrix ───────────────────────────────────────────────────

/// Symmetric pairwise Euclidean distances, row-major `n × n`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    dist: Vec<f64>,
}

impl DistanceMatrix {
    /// Computes all pairwise distances, polling `cancel` once per row.
    ///
    /// ```
    /// use u_layer_eval::distance::DistanceMatrix;
    ///
    /// let data = vec![vec![0.0, 0.0], vec![3.0, 4.0]];
    /// let dm = DistanceMatrix::compute(&data, None).unwrap();
    /// assert_eq!(dm.get(0, 1), 5.0);
    /// assert_eq!(dm.get(1, 0), 5.0);
    /// ```
    pub fn compute(data: &[Vec<f64>], cancel: Option<&CancelFlag>) -> Result<Self, EvalError> {
        let n = data.len();
        let mut dist = vec![0.0f64; n * n];
        for i in 0..n {
            cancel::poll(cancel)?;
            for j in (i + 1)..n {
                let d = euclidean_dist(&data[i], &data[j]);
                dist[i * n + j] = d;
                dist[j * n + i] = d;
            }
        }
        Ok(Self { n, dist })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.dist[i * self.n + j]
    }

    /// Row `i` as a slice.
    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.dist[i * self.n..(i + 1) * self.n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_basic() {
        assert_eq!(euclidean_dist(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean_dist_sq(&[1.0], &[3.0]), 4.0);
        assert_eq!(euclidean_dist(&[], &[]), 0.0);
    }

    #[test]
    fn centroid_mean() {
        let pts = [vec![0.0, 2.0], vec![2.0, 4.0]];
        let c = centroid(pts.iter().map(|p| p.as_slice())).unwrap();
        assert_eq!(c, vec![1.0, 3.0]);
    }

    #[test]
    fn centroid_empty_is_none() {
        let pts: Vec<Vec<f64>> = vec![];
        assert!(centroid(pts.iter().map(|p| p.as_slice())).is_none());
    }

    #[test]
    fn dense_centroids_with_empty_cluster() {
        let data = vec![vec![0.0], vec![2.0], vec![10.0]];
        let cents = dense_centroids(&data, &[0, 0, 2], 3);
        assert_eq!(cents[0], Some(vec![1.0]));
        assert_eq!(cents[1], None);
        assert_eq!(cents[2], Some(vec![10.0]));
    }

    #[test]
    fn matrix_is_symmetric_with_zero_diagonal() {
        let data = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 2.0]];
        let dm = DistanceMatrix::compute(&data, None).unwrap();
        assert_eq!(dm.len(), 3);
        for i in 0..3 {
            assert_eq!(dm.get(i, i), 0.0);
            for j in 0..3 {
                assert_eq!(dm.get(i, j), dm.get(j, i));
            }
        }
        assert_eq!(dm.row(2), &[2.0, 5f64.sqrt(), 0.0]);
    }

    #[test]
    fn matrix_respects_cancellation() {
        let flag = CancelFlag::new();
        flag.cancel();
        let data = vec![vec![0.0], vec![1.0]];
        assert!(matches!(
            DistanceMatrix::compute(&data, Some(&flag)),
            Err(EvalError::Cancelled)
        ));
    }

    #[test]
    fn empty_matrix() {
        let dm = DistanceMatrix::compute(&[], None).unwrap();
        assert!(dm.is_empty());
    }
}
