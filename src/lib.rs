//! # u-layer-eval
//!
//! Clustering-quality evaluation engine with C FFI bindings.
//!
//! u-layer-eval compares a manual grouping of audio segments (layers)
//! against an automatic clustering of the same segments. It reports how
//! well the two partitions agree and how well separated each one is in
//! feature space. It can also push the automatic clustering toward a target
//! cluster count by repeated splits and merges.
//!
//! ## Modules
//!
//! - [`features`]: Sample vectors, label assignments, collaborator traits, z-score normalization
//! - [`distance`]: Euclidean distances, centroids, pairwise distance matrix
//! - [`contingency`]: Manual × automatic contingency table over scored samples
//! - [`external`]: ARI, NMI, purity, homogeneity/completeness/V-measure, B-cubed
//! - [`internal`]: Silhouette (global and per cluster), Davies-Bouldin, Calinski-Harabasz
//! - [`alignment`]: Majority and one-to-one label mappings, per-class metrics, merge/split detection
//! - [`ambiguity`]: Centroid ranking and margin per sample
//! - [`report`]: [`ComparisonReportBuilder`](report::ComparisonReportBuilder) producing [`ComparisonMetrics`](report::ComparisonMetrics)
//! - [`calibrate`]: Split/merge recalibration toward a target cluster count
//! - [`session`]: Serialized comparison session document
//! - [`config`]: Thresholds and calibration constants
//! - [`cancel`]: Cooperative cancellation flag
//! - [`ffi`]: C FFI bindings (JSON requests, auto-generated C header via cbindgen)
//! - [`error`]: Error types
//!
//! ## Quick Start
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
//! let automatic = LabelAssignment::from_groups(&[vec!["s1", "s2", "s3"], vec!["s4", "s5", "s6"]]);
//!
//! let metrics = ComparisonReportBuilder::new()
//!     .build(&manual, &automatic, &samples)
//!     .unwrap();
//!
//! assert!((metrics.external.ari - 1.0).abs() < 1e-12);
//! assert!((metrics.alignment.mapped_accuracy - 1.0).abs() < 1e-12);
//! assert_eq!(metrics.confusion.cells(), &[vec![3, 0], vec![0, 3]]);
//! ```

pub mod alignment;
pub mod ambiguity;
pub mod calibrate;
pub mod cancel;
pub mod config;
pub mod contingency;
pub mod distance;
pub mod error;
pub mod external;
pub mod features;
pub mod ffi;
pub mod internal;
pub mod report;
pub mod session;
