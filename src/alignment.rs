//! Label alignment between manual groups and automatic clusters.
//!
//! Two mappings are derived from the contingency table:
//!
//! - **Majority (many-to-one)**: each manual label maps to the automatic
//!   cluster holding most of its samples. Several manual labels may share a
//!   cluster.
//! - **Greedy one-to-one**: positive cells are taken largest first, skipping
//!   any whose row or column is already used. This is an approximation of an
//!   optimal assignment, kept because exported sessions were scored with it.
//!
//! A positive gap between the two accuracies means several manual groups
//! collapsed into one automatic cluster. Merge and split findings name those
//! groups explicitly.
//!
//! ```
//! use u_layer_eval::alignment::LabelAlignment;
//! use u_layer_eval::config::AlignmentThresholds;
//! use u_layer_eval::contingency::ContingencyTable;
//!
//! // Manual groups 0 and 1 both landed in automatic cluster 0
//! let table = ContingencyTable::from_pairs(vec![(0, 0), (0, 0), (1, 0), (1, 0), (2, 1), (2, 1)]);
//! let alignment = LabelAlignment::compute(&table, &AlignmentThresholds::default());
//!
//! assert_eq!(alignment.mapped_accuracy, 1.0);
//! assert!(alignment.accuracy_gap > 0.0);
//! assert_eq!(alignment.merges[0].automatic_label, 0);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::AlignmentThresholds;
use crate::contingency::ContingencyTable;
use crate::features::ClusterLabel;

// ── Findings ──────────────────────────────────────────────────────────

/// A manual label together with the share of its samples in some cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelShare {
    pub label: ClusterLabel,
    pub share: f64,
}

/// Several manual groups dominated by the same automatic cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeFinding {
    pub automatic_label: ClusterLabel,
    /// Manual labels whose share in `automatic_label` reached the threshold,
    /// in label order.
    pub manual: Vec<LabelShare>,
}

/// A manual group spread over two automatic clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitFinding {
    pub manual_label: ClusterLabel,
    /// Automatic cluster with the largest share.
    pub primary: LabelShare,
    /// Automatic cluster with the second-largest share.
    pub secondary: LabelShare,
}

/// Precision/recall/F1 of one manual class under the majority mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub manual_label: ClusterLabel,
    pub mapped_automatic_label: ClusterLabel,
    pub support: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Mappings, accuracies and structural findings for one comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelAlignment {
    pub majority_mapping: BTreeMap<ClusterLabel, ClusterLabel>,
    pub one_to_one_mapping: BTreeMap<ClusterLabel, ClusterLabel>,
    pub mapped_accuracy: f64,
    pub one_to_one_accuracy: f64,
    /// `mapped_accuracy - one_to_one_accuracy`.
    pub accuracy_gap: f64,
    pub per_class: Vec<ClassMetrics>,
    pub merges: Vec<MergeFinding>,
    pub splits: Vec<SplitFinding>,
}

impl LabelAlignment {
    /// Derives every mapping and finding from `table`.
    pub fn compute(table: &ContingencyTable, thresholds: &AlignmentThresholds) -> Self {
        let majority = majority_columns(table);
        let one_to_one = greedy_one_to_one(table);

        let mapped_accuracy = accuracy(table, majority.iter().enumerate().map(|(r, &c)| (r, c)));
        let one_to_one_accuracy = accuracy(table, one_to_one.iter().copied());

        let majority_mapping = majority
            .iter()
            .enumerate()
            .map(|(r, &c)| (table.manual_labels()[r], table.auto_labels()[c]))
            .collect();
        let one_to_one_mapping = one_to_one
            .iter()
            .map(|&(r, c)| (table.manual_labels()[r], table.auto_labels()[c]))
            .collect();

        Self {
            majority_mapping,
            one_to_one_mapping,
            mapped_accuracy,
            one_to_one_accuracy,
            accuracy_gap: mapped_accuracy - one_to_one_accuracy,
            per_class: per_class_metrics(table, &majority),
            merges: detect_merges(table, thresholds.merge_share),
            splits: detect_splits(
                table,
                thresholds.split_top_share_max,
                thresholds.split_second_share_min,
            ),
        }
    }
}

// ── Mappings ──────────────────────────────────────────────────────────

/// Majority column per row. Ties go to the lowest column index.
fn majority_columns(table: &ContingencyTable) -> Vec<usize> {
    table
        .cells()
        .iter()
        .map(|row| {
            let mut best = 0;
            for (c, &count) in row.iter().enumerate() {
                if count > row[best] {
                    best = c;
                }
            }
            best
        })
        .collect()
}

/// Greedy one-to-one `(row, col)` pairs, largest cells first.
///
/// Equal counts are taken in row-major order, so lower labels win ties.
fn greedy_one_to_one(table: &ContingencyTable) -> Vec<(usize, usize)> {
    let mut candidates: Vec<(usize, usize, usize)> = Vec::new();
    for (r, row) in table.cells().iter().enumerate() {
        for (c, &count) in row.iter().enumerate() {
            if count > 0 {
                candidates.push((count, r, c));
            }
        }
    }
    // Stable sort keeps row-major order among equal counts
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    let mut used_rows = vec![false; table.n_rows()];
    let mut used_cols = vec![false; table.n_cols()];
    let mut pairs = Vec::new();
    for (_, r, c) in candidates {
        if used_rows[r] || used_cols[c] {
            continue;
        }
        used_rows[r] = true;
        used_cols[c] = true;
        pairs.push((r, c));
    }
    pairs.sort_unstable();
    pairs
}

fn accuracy<I>(table: &ContingencyTable, pairs: I) -> f64
where
    I: IntoIterator<Item = (usize, usize)>,
{
    let n = table.n();
    if n == 0 {
        return 0.0;
    }
    let hits: usize = pairs.into_iter().map(|(r, c)| table.cell(r, c)).sum();
    hits as f64 / n as f64
}

fn per_class_metrics(table: &ContingencyTable, majority: &[usize]) -> Vec<ClassMetrics> {
    let rows = table.row_sums();
    let cols = table.col_sums();
    majority
        .iter()
        .enumerate()
        .map(|(r, &c)| {
            let tp = table.cell(r, c) as f64;
            let precision = if cols[c] > 0 { tp / cols[c] as f64 } else { 0.0 };
            let recall = if rows[r] > 0 { tp / rows[r] as f64 } else { 0.0 };
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassMetrics {
                manual_label: table.manual_labels()[r],
                mapped_automatic_label: table.auto_labels()[c],
                support: rows[r],
                precision,
                recall,
                f1,
            }
        })
        .collect()
}

// ── Merge / split detection ───────────────────────────────────────────

/// Automatic clusters in which at least two manual groups each have a share
/// of `min_share` or more.
fn detect_merges(table: &ContingencyTable, min_share: f64) -> Vec<MergeFinding> {
    let rows = table.row_sums();
    let mut by_col: Vec<Vec<LabelShare>> = vec![Vec::new(); table.n_cols()];

    for (r, row) in table.cells().iter().enumerate() {
        if rows[r] == 0 {
            continue;
        }
        for (c, &count) in row.iter().enumerate() {
            let share = count as f64 / rows[r] as f64;
            if count > 0 && share >= min_share {
                by_col[c].push(LabelShare {
                    label: table.manual_labels()[r],
                    share,
                });
            }
        }
    }

    by_col
        .into_iter()
        .enumerate()
        .filter(|(_, manual)| manual.len() >= 2)
        .map(|(c, manual)| MergeFinding {
            automatic_label: table.auto_labels()[c],
            manual,
        })
        .collect()
}

/// Manual groups whose top share is below `top_max` while the second share
/// reaches `second_min`.
fn detect_splits(table: &ContingencyTable, top_max: f64, second_min: f64) -> Vec<SplitFinding> {
    let rows = table.row_sums();
    let mut splits = Vec::new();

    for (r, row) in table.cells().iter().enumerate() {
        if rows[r] == 0 || row.len() < 2 {
            continue;
        }
        let mut ranked: Vec<LabelShare> = row
            .iter()
            .enumerate()
            .map(|(c, &count)| LabelShare {
                label: table.auto_labels()[c],
                share: count as f64 / rows[r] as f64,
            })
            .collect();
        // Stable: equal shares stay in column order
        ranked.sort_by(|a, b| b.share.total_cmp(&a.share));

        let (top, second) = (ranked[0], ranked[1]);
        if top.share < top_max && second.share >= second_min {
            splits.push(SplitFinding {
                manual_label: table.manual_labels()[r],
                primary: top,
                secondary: second,
            });
        }
    }
    splits
}
