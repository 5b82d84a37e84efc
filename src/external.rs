//! External validation: agreement between the manual and automatic partitions.
//!
//! Every metric reads the shared [`ContingencyTable`] only. Degenerate
//! tables produce fixed substitution values instead of errors:
//!
//! | Metric | Substitution |
//! |--------|--------------|
//! | ARI | 1.0 when n ≤ 1 or expected index == max index |
//! | NMI | 0.0 when either entropy is 0 |
//! | Purity | 0.0 when n = 0 |
//! | Homogeneity / Completeness | 1.0 when H(manual) / H(automatic) is 0 |
//! | V-measure | 0.0 when homogeneity + completeness = 0 |
//! | B³ | 0.0 when n = 0; F1 0.0 when P + R = 0 |
//!
//! ```
//! use u_layer_eval::contingency::ContingencyTable;
//! use u_layer_eval::external::ExternalScores;
//!
//! // Same partition, different label ids
//! let table = ContingencyTable::from_pairs(vec![(0, 7), (0, 7), (1, 3), (1, 3)]);
//! let scores = ExternalScores::compute(&table, 1e-12);
//! assert!((scores.ari - 1.0).abs() < 1e-12);
//! assert!((scores.nmi - 1.0).abs() < 1e-9);
//! assert!((scores.purity - 1.0).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};

use crate::contingency::ContingencyTable;

/// All external agreement scores for one comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalScores {
    pub ari: f64,
    pub nmi: f64,
    pub purity: f64,
    pub homogeneity: f64,
    pub completeness: f64,
    pub v_measure: f64,
    pub b_cubed: BCubedScores,
}

impl ExternalScores {
    /// Computes every external metric from one table.
    pub fn compute(table: &ContingencyTable, probability_floor: f64) -> Self {
        let hcv = homogeneity_completeness_v(table, probability_floor);
        Self {
            ari: adjusted_rand_index(table),
            nmi: normalized_mutual_info(table, probability_floor),
            purity: purity(table),
            homogeneity: hcv.homogeneity,
            completeness: hcv.completeness,
            v_measure: hcv.v_measure,
            b_cubed: b_cubed(table),
        }
    }
}

/// Entropy-based homogeneity, completeness and their harmonic mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HomogeneityScores {
    pub homogeneity: f64,
    pub completeness: f64,
    pub v_measure: f64,
}

/// Per-element B³ precision, recall and F1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BCubedScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

// ── ARI ───────────────────────────────────────────────────────────────

#[inline]
fn comb2(x: usize) -> f64 {
    let x = x as f64;
    x * (x - 1.0) / 2.0
}

/// Adjusted Rand Index (Hubert & Arabie, 1985).
///
/// Returns 1.0 when n ≤ 1 or when the expected and maximum indices coincide.
pub fn adjusted_rand_index(table: &ContingencyTable) -> f64 {
    let n = table.n();
    if n <= 1 {
        return 1.0;
    }

    let index: f64 = table.cells().iter().flatten().map(|&c| comb2(c)).sum();
    let sum_rows: f64 = table.row_sums().into_iter().map(comb2).sum();
    let sum_cols: f64 = table.col_sums().into_iter().map(comb2).sum();
    let total = comb2(n);

    let expected = sum_rows * sum_cols / total;
    let max_index = (sum_rows + sum_cols) / 2.0;
    let denom = max_index - expected;
    if denom.abs() < 1e-12 {
        return 1.0;
    }

    (index - expected) / denom
}

// ── Entropy / NMI ─────────────────────────────────────────────────────

/// Shannon entropy (natural log) of a count distribution.
fn entropy(counts: &[usize], n: usize, floor: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = (c as f64 / n as f64).max(floor);
            -p * p.ln()
        })
        .sum()
}

/// Mutual information (natural log) over the nonzero cells.
fn mutual_info(table: &ContingencyTable, floor: f64) -> f64 {
    let n = table.n();
    if n == 0 {
        return 0.0;
    }
    let nf = n as f64;
    let rows = table.row_sums();
    let cols = table.col_sums();

    let mut mi = 0.0;
    for (r, row) in table.cells().iter().enumerate() {
        for (c, &count) in row.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let p_joint = (count as f64 / nf).max(floor);
            let p_row = (rows[r] as f64 / nf).max(floor);
            let p_col = (cols[c] as f64 / nf).max(floor);
            mi += p_joint * (p_joint / (p_row * p_col)).ln();
        }
    }
    mi
}

/// Normalized Mutual Information, `MI / sqrt(H(manual) · H(automatic))`.
///
/// Returns 0.0 when either partition has zero entropy.
pub fn normalized_mutual_info(table: &ContingencyTable, probability_floor: f64) -> f64 {
    let n = table.n();
    let h_manual = entropy(&table.row_sums(), n, probability_floor);
    let h_auto = entropy(&table.col_sums(), n, probability_floor);
    if h_manual <= 0.0 || h_auto <= 0.0 {
        return 0.0;
    }
    mutual_info(table, probability_floor) / (h_manual * h_auto).sqrt()
}

// ── Purity ────────────────────────────────────────────────────────────

/// Fraction of scored samples belonging to their automatic cluster's
/// majority manual label.
pub fn purity(table: &ContingencyTable) -> f64 {
    let n = table.n();
    if n == 0 {
        return 0.0;
    }
    let majority_sum: usize = (0..table.n_cols())
        .map(|c| {
            table
                .cells()
                .iter()
                .map(|row| row[c])
                .max()
                .unwrap_or(0)
        })
        .sum();
    majority_sum as f64 / n as f64
}

// ── Homogeneity / Completeness / V-measure ───────────────────────────

/// Rosenberg & Hirschberg (2007) V-measure family.
///
/// Homogeneity is `MI / H(manual)` and completeness is `MI / H(automatic)`,
/// each defined as 1.0 when its entropy is 0.
pub fn homogeneity_completeness_v(
    table: &ContingencyTable,
    probability_floor: f64,
) -> HomogeneityScores {
    let n = table.n();
    let h_manual = entropy(&table.row_sums(), n, probability_floor);
    let h_auto = entropy(&table.col_sums(), n, probability_floor);
    let mi = mutual_info(table, probability_floor);

    let homogeneity = if h_manual <= 0.0 { 1.0 } else { mi / h_manual };
    let completeness = if h_auto <= 0.0 { 1.0 } else { mi / h_auto };
    let v_measure = if homogeneity + completeness <= 0.0 {
        0.0
    } else {
        2.0 * homogeneity * completeness / (homogeneity + completeness)
    };

    HomogeneityScores {
        homogeneity,
        completeness,
        v_measure,
    }
}

// ── B³ ────────────────────────────────────────────────────────────────

/// B-cubed (Bagga & Baldwin, 1998) over the scored samples.
///
/// Every sample in cell `(r, c)` has precision `n_rc / |column c|` and recall
/// `n_rc / |row r|`; both are averaged over all scored samples.
pub fn b_cubed(table: &ContingencyTable) -> BCubedScores {
    let n = table.n();
    if n == 0 {
        return BCubedScores::default();
    }
    let rows = table.row_sums();
    let cols = table.col_sums();

    let mut precision_sum = 0.0;
    let mut recall_sum = 0.0;
    for (r, row) in table.cells().iter().enumerate() {
        for (c, &count) in row.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let overlap = count as f64;
            precision_sum += overlap * overlap / cols[c] as f64;
            recall_sum += overlap * overlap / rows[r] as f64;
        }
    }

    let precision = precision_sum / n as f64;
    let recall = recall_sum / n as f64;
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    BCubedScores {
        precision,
        recall,
        f1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: f64 = 1e-12;

    fn table(pairs: &[(u32, u32)]) -> ContingencyTable {
        ContingencyTable::from_pairs(pairs.iter().copied())
    }

    fn identical_relabeled() -> ContingencyTable {
        table(&[(0, 5), (0, 5), (0, 5), (1, 0), (1, 0), (2, 9), (2, 9)])
    }

    fn single_auto_cluster() -> ContingencyTable {
        table(&[(0, 0), (0, 0), (1, 0), (1, 0), (2, 0)])
    }

    // ── ARI ──────────────────────────────────────────────────────

    #[test]
    fn ari_identical_partitions() {
        assert!((adjusted_rand_index(&identical_relabeled()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ari_single_auto_cluster_is_zero() {
        assert!(adjusted_rand_index(&single_auto_cluster()).abs() < 1e-12);
    }

    #[test]
    fn ari_degenerate_cases_are_one() {
        assert_eq!(adjusted_rand_index(&table(&[])), 1.0);
        assert_eq!(adjusted_rand_index(&table(&[(3, 4)])), 1.0);
        // Both partitions a single cluster: expected == max
        assert_eq!(adjusted_rand_index(&table(&[(0, 0), (0, 0), (0, 0)])), 1.0);
    }

    #[test]
    fn ari_known_value() {
        // sklearn: adjusted_rand_score([0,0,1,1], [0,0,1,2]) = 0.5714...
        let t = table(&[(0, 0), (0, 0), (1, 1), (1, 2)]);
        assert!((adjusted_rand_index(&t) - 4.0 / 7.0).abs() < 1e-12);
    }

    // ── NMI ──────────────────────────────────────────────────────

    #[test]
    fn nmi_identical_partitions() {
        let nmi = normalized_mutual_info(&identical_relabeled(), FLOOR);
        assert!((nmi - 1.0).abs() < 1e-9, "nmi = {nmi}");
    }

    #[test]
    fn nmi_zero_entropy_is_zero() {
        assert_eq!(normalized_mutual_info(&single_auto_cluster(), FLOOR), 0.0);
        assert_eq!(normalized_mutual_info(&table(&[]), FLOOR), 0.0);
    }

    #[test]
    fn nmi_independent_partitions() {
        // Each manual group spread evenly over both automatic clusters
        let t = table(&[(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert!(normalized_mutual_info(&t, FLOOR).abs() < 1e-12);
    }

    #[test]
    fn nmi_in_unit_interval() {
        let t = table(&[(0, 0), (0, 0), (0, 1), (1, 1), (1, 2), (2, 2)]);
        let nmi = normalized_mutual_info(&t, FLOOR);
        assert!(nmi > 0.0 && nmi < 1.0, "nmi = {nmi}");
    }

    // ── Purity ───────────────────────────────────────────────────

    #[test]
    fn purity_values() {
        assert!((purity(&identical_relabeled()) - 1.0).abs() < 1e-12);
        assert!((purity(&single_auto_cluster()) - 2.0 / 5.0).abs() < 1e-12);
        assert_eq!(purity(&table(&[])), 0.0);
    }

    // ── Homogeneity / Completeness ───────────────────────────────

    #[test]
    fn hcv_identical() {
        let s = homogeneity_completeness_v(&identical_relabeled(), FLOOR);
        assert!((s.homogeneity - 1.0).abs() < 1e-9);
        assert!((s.completeness - 1.0).abs() < 1e-9);
        assert!((s.v_measure - 1.0).abs() < 1e-9);
    }

    #[test]
    fn hcv_single_auto_cluster() {
        let s = homogeneity_completeness_v(&single_auto_cluster(), FLOOR);
        // MI is 0; H(automatic) is 0 so completeness is 1 by definition
        assert!(s.homogeneity.abs() < 1e-12);
        assert_eq!(s.completeness, 1.0);
        assert!(s.v_measure.abs() < 1e-12);
    }

    #[test]
    fn hcv_split_is_homogeneous_not_complete() {
        // Every automatic cluster is pure, but manual 0 is split in two
        let t = table(&[(0, 0), (0, 0), (0, 1), (0, 1), (1, 2), (1, 2)]);
        let s = homogeneity_completeness_v(&t, FLOOR);
        assert!((s.homogeneity - 1.0).abs() < 1e-9);
        assert!(s.completeness < 1.0);
    }

    // ── B³ ───────────────────────────────────────────────────────

    #[test]
    fn b_cubed_identical() {
        let s = b_cubed(&identical_relabeled());
        assert!((s.precision - 1.0).abs() < 1e-12);
        assert!((s.recall - 1.0).abs() < 1e-12);
        assert!((s.f1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn b_cubed_single_cluster() {
        // manual groups 2,2,1 in one automatic cluster of 5
        let s = b_cubed(&single_auto_cluster());
        let expected_p = (2.0 * 2.0 / 5.0 + 2.0 * 2.0 / 5.0 + 1.0 / 5.0) / 5.0;
        assert!((s.precision - expected_p).abs() < 1e-12);
        assert!((s.recall - 1.0).abs() < 1e-12);
    }

    #[test]
    fn b_cubed_empty() {
        assert_eq!(b_cubed(&table(&[])), BCubedScores::default());
    }

    #[test]
    fn compute_aggregates() {
        let s = ExternalScores::compute(&identical_relabeled(), FLOOR);
        assert!((s.ari - 1.0).abs() < 1e-12);
        assert!((s.b_cubed.f1 - 1.0).abs() < 1e-12);
    }
}
