//! Manual × automatic contingency table over the scored samples.
//!
//! A sample is *scored* when it carries a label in both assignments. Labels
//! seen only on unscored samples never appear in the table. Rows and columns
//! are the sorted distinct manual and automatic labels; row and column sums
//! are derived from the cells on demand.
//!
//! ```
//! use u_layer_eval::contingency::ContingencyTable;
//! use u_layer_eval::features::LabelAssignment;
//!
//! let manual: LabelAssignment = vec![("a", 0), ("b", 0), ("c", 1), ("x", 9)].into_iter().collect();
//! let auto: LabelAssignment = vec![("a", 5), ("b", 2), ("c", 2)].into_iter().collect();
//! let table = ContingencyTable::build(&manual, &auto);
//!
//! assert_eq!(table.n(), 3);
//! assert_eq!(table.manual_labels(), &[0, 1]);
//! assert_eq!(table.auto_labels(), &[2, 5]);
//! assert_eq!(table.cells(), &[vec![1, 1], vec![1, 0]]);
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::features::{ClusterLabel, LabelAssignment};

/// A sample present in both assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredSample {
    pub id: String,
    pub manual: ClusterLabel,
    pub automatic: ClusterLabel,
}

/// Samples labeled in both assignments, in id order.
pub fn scored_samples(manual: &LabelAssignment, automatic: &LabelAssignment) -> Vec<ScoredSample> {
    manual
        .iter()
        .filter_map(|(id, m)| {
            automatic.get(id).map(|a| ScoredSample {
                id: id.to_string(),
                manual: m,
                automatic: a,
            })
        })
        .collect()
}

/// Counts of scored samples per (manual, automatic) label pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContingencyTable {
    manual_labels: Vec<ClusterLabel>,
    auto_labels: Vec<ClusterLabel>,
    cells: Vec<Vec<usize>>,
    n: usize,
}

impl ContingencyTable {
    /// Builds the table from two assignments over their shared ids.
    pub fn build(manual: &LabelAssignment, automatic: &LabelAssignment) -> Self {
        Self::from_pairs(
            scored_samples(manual, automatic)
                .iter()
                .map(|s| (s.manual, s.automatic)),
        )
    }

    /// Builds the table from `(manual, automatic)` label pairs, one per sample.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (ClusterLabel, ClusterLabel)>,
    {
        let pairs: Vec<(ClusterLabel, ClusterLabel)> = pairs.into_iter().collect();
        let manual_labels: Vec<ClusterLabel> = pairs
            .iter()
            .map(|&(m, _)| m)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let auto_labels: Vec<ClusterLabel> = pairs
            .iter()
            .map(|&(_, a)| a)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut cells = vec![vec![0usize; auto_labels.len()]; manual_labels.len()];
        for &(m, a) in &pairs {
            // Both searches succeed: the label lists were built from `pairs`.
            let row = manual_labels.binary_search(&m);
            let col = auto_labels.binary_search(&a);
            if let (Ok(r), Ok(c)) = (row, col) {
                cells[r][c] += 1;
            }
        }

        Self {
            manual_labels,
            auto_labels,
            cells,
            n: pairs.len(),
        }
    }

    /// Number of scored samples (total of all cells).
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn n_rows(&self) -> usize {
        self.manual_labels.len()
    }

    pub fn n_cols(&self) -> usize {
        self.auto_labels.len()
    }

    /// Sorted distinct manual labels (rows).
    pub fn manual_labels(&self) -> &[ClusterLabel] {
        &self.manual_labels
    }

    /// Sorted distinct automatic labels (columns).
    pub fn auto_labels(&self) -> &[ClusterLabel] {
        &self.auto_labels
    }

    pub fn cells(&self) -> &[Vec<usize>] {
        &self.cells
    }

    #[inline]
    pub fn cell(&self, row: usize, col: usize) -> usize {
        self.cells[row][col]
    }

    pub fn row_index(&self, manual: ClusterLabel) -> Option<usize> {
        self.manual_labels.binary_search(&manual).ok()
    }

    pub fn col_index(&self, automatic: ClusterLabel) -> Option<usize> {
        self.auto_labels.binary_search(&automatic).ok()
    }

    /// Scored samples per manual label, in row order.
    pub fn row_sums(&self) -> Vec<usize> {
        self.cells.iter().map(|row| row.iter().sum()).collect()
    }

    /// Scored samples per automatic label, in column order.
    pub fn col_sums(&self) -> Vec<usize> {
        let mut sums = vec![0usize; self.n_cols()];
        for row in &self.cells {
            for (s, &v) in sums.iter_mut().zip(row.iter()) {
                *s += v;
            }
        }
        sums
    }
}
