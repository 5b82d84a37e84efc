//! Per-sample ambiguity against the automatic cluster centroids.
//!
//! Centroids are the mean vectors of the scored, vector-bearing members of
//! each cluster, computed for both labelings. For every sample the distances
//! to all automatic centroids are ranked; the margin `d2 / d1` is small when
//! the sample sits between two clusters and infinite when there is no
//! second cluster or the sample coincides with its nearest centroid.
//!
//! ```
//! use u_layer_eval::ambiguity::analyze;
//!
//! let points = vec![vec![0.0], vec![2.0], vec![10.0], vec![6.0]];
//! let analysis = analyze(&points, &[0, 0, 1, 1], &[0, 0, 1, 1]);
//!
//! // Sample 3 (at 6.0) is 2.0 from its own centroid (8.0) and 5.0 from the other (1.0)
//! let s = &analysis.samples[3];
//! assert_eq!(s.nearest, Some(1));
//! assert!((s.margin - 5.0 / 2.0).abs() < 1e-12);
//! ```

use std::collections::BTreeMap;

use crate::distance::{centroid, euclidean_dist};
use crate::features::ClusterLabel;

/// Distance from a sample to one automatic centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentroidDistance {
    pub label: ClusterLabel,
    pub distance: f64,
}

/// Ambiguity diagnostics for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleAmbiguity {
    /// Distances to every automatic centroid, nearest first.
    pub ranked: Vec<CentroidDistance>,
    pub nearest: Option<ClusterLabel>,
    pub second_nearest: Option<ClusterLabel>,
    /// `d2 / d1`; infinite with fewer than two clusters or when `d1` is 0.
    pub margin: f64,
    pub distance_to_manual_centroid: f64,
    pub distance_to_automatic_centroid: f64,
}

/// Centroids of both labelings plus one [`SampleAmbiguity`] per point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmbiguityAnalysis {
    pub manual_centroids: BTreeMap<ClusterLabel, Vec<f64>>,
    pub automatic_centroids: BTreeMap<ClusterLabel, Vec<f64>>,
    pub samples: Vec<SampleAmbiguity>,
}

/// Mean vector per label.
pub fn centroids_by_label(
    points: &[Vec<f64>],
    labels: &[ClusterLabel],
) -> BTreeMap<ClusterLabel, Vec<f64>> {
    let mut members: BTreeMap<ClusterLabel, Vec<&[f64]>> = BTreeMap::new();
    for (p, &l) in points.iter().zip(labels.iter()) {
        members.entry(l).or_default().push(p.as_slice());
    }
    members
        .into_iter()
        .filter_map(|(l, pts)| centroid(pts).map(|c| (l, c)))
        .collect()
}

/// Analyzes every point. `points`, `manual` and `automatic` are parallel.
pub fn analyze(
    points: &[Vec<f64>],
    manual: &[ClusterLabel],
    automatic: &[ClusterLabel],
) -> AmbiguityAnalysis {
    debug_assert_eq!(points.len(), manual.len());
    debug_assert_eq!(points.len(), automatic.len());

    let manual_centroids = centroids_by_label(points, manual);
    let automatic_centroids = centroids_by_label(points, automatic);

    let samples = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut ranked: Vec<CentroidDistance> = automatic_centroids
                .iter()
                .map(|(&label, c)| CentroidDistance {
                    label,
                    distance: euclidean_dist(p, c),
                })
                .collect();
            // Stable: equal distances keep label order
            ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));

            let margin = match (ranked.first(), ranked.get(1)) {
                (Some(d1), Some(d2)) if d1.distance > 0.0 => d2.distance / d1.distance,
                _ => f64::INFINITY,
            };

            let own_distance = |centroids: &BTreeMap<ClusterLabel, Vec<f64>>, label| {
                centroids
                    .get(&label)
                    .map_or(0.0, |c| euclidean_dist(p, c))
            };

            SampleAmbiguity {
                nearest: ranked.first().map(|d| d.label),
                second_nearest: ranked.get(1).map(|d| d.label),
                margin,
                distance_to_manual_centroid: own_distance(&manual_centroids, manual[i]),
                distance_to_automatic_centroid: own_distance(&automatic_centroids, automatic[i]),
                ranked,
            }
        })
        .collect();

    AmbiguityAnalysis {
        manual_centroids,
        automatic_centroids,
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroids_per_label() {
        let points = vec![vec![0.0, 0.0], vec![2.0, 2.0], vec![10.0, 0.0]];
        let cents = centroids_by_label(&points, &[4, 4, 1]);
        assert_eq!(cents.len(), 2);
        assert_eq!(cents[&4], vec![1.0, 1.0]);
        assert_eq!(cents[&1], vec![10.0, 0.0]);
    }

    #[test]
    fn ranks_and_margin() {
        let points = vec![vec![0.0], vec![2.0], vec![10.0], vec![12.0]];
        let a = analyze(&points, &[0, 0, 1, 1], &[0, 0, 1, 1]);
        // centroids 1.0 and 11.0
        let s0 = &a.samples[0];
        assert_eq!(s0.nearest, Some(0));
        assert_eq!(s0.second_nearest, Some(1));
        assert_eq!(s0.ranked.len(), 2);
        assert!((s0.margin - 11.0).abs() < 1e-12);
        assert!((s0.distance_to_automatic_centroid - 1.0).abs() < 1e-12);
        assert!((s0.distance_to_manual_centroid - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_cluster_margin_is_infinite() {
        let points = vec![vec![0.0], vec![2.0]];
        let a = analyze(&points, &[0, 1], &[3, 3]);
        assert!(a.samples.iter().all(|s| s.margin.is_infinite()));
        assert!(a.samples.iter().all(|s| s.second_nearest.is_none()));
        assert_eq!(a.samples[0].nearest, Some(3));
    }

    #[test]
    fn zero_nearest_distance_margin_is_infinite() {
        let points = vec![vec![5.0], vec![0.0]];
        let a = analyze(&points, &[0, 1], &[0, 1]);
        // each point is its own singleton centroid
        assert!(a.samples[0].margin.is_infinite());
    }

    #[test]
    fn manual_centroid_distance_differs_from_automatic() {
        let points = vec![vec![0.0], vec![4.0], vec![10.0]];
        // manual groups {0, 4} and {10}; automatic groups {0} and {4, 10}
        let a = analyze(&points, &[0, 0, 1], &[0, 1, 1]);
        let s1 = &a.samples[1];
        assert!((s1.distance_to_manual_centroid - 2.0).abs() < 1e-12);
        assert!((s1.distance_to_automatic_centroid - 3.0).abs() < 1e-12);
    }

    #[test]
    fn ties_keep_label_order() {
        let points = vec![vec![5.0], vec![0.0], vec![10.0]];
        let a = analyze(&points, &[0, 0, 0], &[9, 2, 7]);
        // point 0 is equidistant (5.0) from centroids 2 (at 0.0) and 7 (at 10.0)
        let s0 = &a.samples[0];
        assert_eq!(s0.nearest, Some(9));
        assert_eq!(s0.ranked[1].label, 2);
        assert_eq!(s0.ranked[2].label, 7);
    }

    #[test]
    fn empty_input() {
        let a = analyze(&[], &[], &[]);
        assert!(a.samples.is_empty());
        assert!(a.automatic_centroids.is_empty());
    }
}
