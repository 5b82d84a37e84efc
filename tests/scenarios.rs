//! End-to-end comparison and calibration scenarios.

use std::collections::BTreeMap;

use u_layer_eval::calibrate::KCalibrator;
use u_layer_eval::config::CalibrationConfig;
use u_layer_eval::error::EvalError;
use u_layer_eval::features::{
    AutoGrouper, FeatureExtractor, FeatureNormalizer, LabelAssignment, Sample, SampleSet,
    SegmentFeatures, ZScoreNormalizer,
};
use u_layer_eval::report::{ComparisonMetrics, ComparisonReportBuilder};
use u_layer_eval::session::ComparisonSession;

const EPS: f64 = 1e-12;

fn six_samples() -> SampleSet {
    SampleSet::from_vectors(vec![
        ("s1", vec![0.0, 0.0]),
        ("s2", vec![0.2, 0.1]),
        ("s3", vec![0.1, 0.3]),
        ("s4", vec![4.0, 4.0]),
        ("s5", vec![4.2, 3.9]),
        ("s6", vec![3.9, 4.1]),
    ])
    .unwrap()
}

fn groups(gs: &[&[&str]]) -> LabelAssignment {
    let owned: Vec<Vec<&str>> = gs.iter().map(|g| g.to_vec()).collect();
    LabelAssignment::from_groups(&owned)
}

fn compare(manual: &LabelAssignment, automatic: &LabelAssignment) -> ComparisonMetrics {
    ComparisonReportBuilder::new()
        .build(manual, automatic, &six_samples())
        .unwrap()
}

#[test]
fn identical_partitions_score_perfectly_under_renumbering() {
    let manual = groups(&[&["s1", "s2", "s3"], &["s4", "s5", "s6"]]);
    let automatic: LabelAssignment = manual
        .iter()
        .map(|(id, l)| (id, if l == 0 { 7 } else { 2 }))
        .collect();
    let m = compare(&manual, &automatic);

    assert!((m.external.ari - 1.0).abs() < EPS);
    assert!((m.external.nmi - 1.0).abs() < 1e-9);
    assert!((m.external.purity - 1.0).abs() < EPS);
    assert!((m.alignment.mapped_accuracy - 1.0).abs() < EPS);
    assert!((m.alignment.one_to_one_accuracy - 1.0).abs() < EPS);
    assert!(m.alignment.accuracy_gap.abs() < EPS);
}

#[test]
fn single_automatic_cluster_is_uninformative() {
    let manual = groups(&[&["s1", "s2", "s3"], &["s4", "s5", "s6"]]);
    let automatic = groups(&[&["s1", "s2", "s3", "s4", "s5", "s6"]]);
    let m = compare(&manual, &automatic);

    assert!(m.external.ari.abs() < EPS);
    assert!(m.external.nmi.abs() < EPS);
    assert_eq!(m.internal_automatic.calinski_harabasz, 0.0);
    assert_eq!(m.internal_automatic.davies_bouldin, 0.0);

    assert_eq!(m.internal_automatic.silhouette_per_cluster.len(), 1);
    assert_eq!(m.internal_automatic.silhouette_per_cluster[&0], 0.0);
}

#[test]
fn contingency_margins_match_scored_label_counts() {
    // s6 is only labeled manually and is not scored
    let manual = groups(&[&["s1", "s2"], &["s3", "s4", "s5", "s6"]]);
    let automatic = groups(&[&["s1"], &["s2", "s3"], &["s4", "s5"]]);
    let m = compare(&manual, &automatic);
    let table = &m.confusion;

    assert_eq!(table.n(), 5);
    assert_eq!(table.row_sums(), vec![2, 3]);
    assert_eq!(table.col_sums(), vec![1, 2, 2]);
    let total: usize = table.cells().iter().flatten().sum();
    assert_eq!(total, table.n());
    assert_eq!(m.union_count, 6);
    assert!((m.coverage - 5.0 / 6.0).abs() < EPS);
}

#[test]
fn silhouette_ignores_label_ids() {
    let manual = groups(&[&["s1", "s2", "s3"], &["s4", "s5", "s6"]]);
    let automatic = groups(&[&["s1", "s2", "s4"], &["s3", "s5", "s6"]]);
    let swapped: LabelAssignment = automatic
        .iter()
        .map(|(id, l)| (id, if l == 0 { 5 } else { 0 }))
        .collect();

    let a = compare(&manual, &automatic);
    let b = compare(&manual, &swapped);
    assert!((a.internal_automatic.silhouette - b.internal_automatic.silhouette).abs() < EPS);
    let db_delta = a.internal_automatic.davies_bouldin - b.internal_automatic.davies_bouldin;
    assert!(db_delta.abs() < EPS);
    assert!((a.external.ari - b.external.ari).abs() < EPS);
}

#[test]
fn six_sample_scenario() {
    let manual = groups(&[&["s1", "s2", "s3"], &["s4", "s5", "s6"]]);
    let automatic = groups(&[&["s1", "s2", "s3"], &["s4", "s5", "s6"]]);
    let m = compare(&manual, &automatic);

    assert_eq!(m.confusion.cells(), &[vec![3, 0], vec![0, 3]]);
    assert!((m.external.ari - 1.0).abs() < EPS);
    assert!((m.external.purity - 1.0).abs() < EPS);
    assert!((m.alignment.mapped_accuracy - 1.0).abs() < EPS);
    assert!(m.misclustered(10).is_empty());
}

#[test]
fn merge_scenario() {
    let manual = groups(&[&["s1", "s2"], &["s3", "s4"], &["s5", "s6"]]);
    let automatic = groups(&[&["s1", "s2", "s3", "s4"], &["s5", "s6"]]);
    let m = compare(&manual, &automatic);

    let merge = m
        .merges()
        .iter()
        .find(|f| f.automatic_label == 0)
        .expect("merge into automatic cluster 0");
    let labels: Vec<u32> = merge.manual.iter().map(|s| s.label).collect();
    assert!(labels.contains(&0) && labels.contains(&1));
    assert!(m.alignment.accuracy_gap > 0.0);
}

#[test]
fn calibration_terminates_for_any_target() {
    let samples = six_samples();
    let automatic = groups(&[&["s1", "s2", "s3", "s4", "s5", "s6"]]);
    let config = CalibrationConfig::default().max_iterations(5).min_split_size(2);

    for target in 1..=8 {
        let outcome = KCalibrator::new()
            .with_config(config.clone())
            .calibrate_to_k(&automatic, &samples, target)
            .unwrap();
        assert!(outcome.iterations <= 5, "target {target}");
        assert_eq!(outcome.labels.len(), 6);
        if outcome.reached_target {
            assert_eq!(outcome.labels.cluster_count(), target);
        }
    }
}

#[test]
fn calibration_recovers_manual_grouping() {
    let samples = six_samples();
    let manual = groups(&[&["s1", "s2", "s3"], &["s4", "s5", "s6"]]);
    let automatic = groups(&[&["s1", "s2", "s3", "s4", "s5", "s6"]]);

    let config = CalibrationConfig::default().min_split_size(2);
    let outcome = KCalibrator::new()
        .with_config(config)
        .calibrate_to_k(&automatic, &samples, 2)
        .unwrap();
    assert!(outcome.reached_target);

    let m = ComparisonReportBuilder::new()
        .build(&manual, &outcome.labels, &samples)
        .unwrap();
    assert!((m.external.ari - 1.0).abs() < EPS);

    let session = ComparisonSession::new(manual, outcome.labels.clone(), m)
        .with_calibration(outcome.summary());
    let back = ComparisonSession::from_json(&session.to_json().unwrap()).unwrap();
    assert_eq!(back.calibration, session.calibration);
}

#[test]
fn session_round_trip_reproduces_report() {
    let manual = groups(&[&["s1", "s2"], &["s3", "s4"], &["s5", "s6"]]);
    let automatic = groups(&[&["s1", "s2", "s3", "s4"], &["s5", "s6"]]);
    let m = compare(&manual, &automatic);
    let session = ComparisonSession::new(manual, automatic, m).with_window_len(4096);

    let json = session.to_json().unwrap();
    let back = ComparisonSession::from_json(&json).unwrap();
    assert_eq!(back.metrics, session.metrics);
    assert_eq!(back.manual, session.manual);
    assert_eq!(back.automatic, session.automatic);
    assert_eq!(back.window_len, Some(4096));

    // Re-encoding is stable
    assert_eq!(back.to_json().unwrap(), json);
}

#[test]
fn unscored_and_vectorless_samples() {
    let samples = SampleSet::from_vectors(vec![
        ("s1", vec![0.0]),
        ("s2", vec![0.1]),
        ("s3", vec![5.0]),
    ])
    .unwrap();
    // s4 is labeled in both but has no vector
    let manual = groups(&[&["s1", "s2"], &["s3", "s4"]]);
    let automatic = groups(&[&["s1", "s2"], &["s3", "s4"]]);
    let m = ComparisonReportBuilder::new()
        .build(&manual, &automatic, &samples)
        .unwrap();

    assert_eq!(m.scored_count, 4);
    let s4 = m.samples.iter().find(|s| s.sample_id == "s4").unwrap();
    assert!(s4.distance_to_automatic_centroid.is_none());
    assert!(s4.margin.is_infinite());

    let json = serde_json::to_string(&m).unwrap();
    assert!(json.contains("\"Infinity\""));
    let back: ComparisonMetrics = serde_json::from_str(&json).unwrap();
    assert_eq!(back, m);
}

/// RMS and zero-crossing rate of the first window; peak level as timbre.
struct LevelExtractor;

impl FeatureExtractor for LevelExtractor {
    fn extract(
        &self,
        samples: &[f32],
        sample_rate: u32,
        window_len: usize,
    ) -> Result<SegmentFeatures, EvalError> {
        if samples.is_empty() || sample_rate == 0 {
            return Err(EvalError::Collaborator("empty segment".into()));
        }
        let window = &samples[..window_len.min(samples.len())];
        let energy: f64 = window.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
        let crossings = window
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        let peak = window.iter().fold(0.0f64, |m, &x| m.max(f64::from(x).abs()));
        Ok(SegmentFeatures {
            rms: (energy / window.len() as f64).sqrt(),
            zero_crossing_rate: crossings as f64 / window.len() as f64,
            timbre_vector: vec![peak],
            ..SegmentFeatures::default()
        })
    }
}

/// Splits ids by a level threshold.
struct ThresholdGrouper {
    levels: BTreeMap<String, f64>,
    threshold: f64,
}

impl AutoGrouper for ThresholdGrouper {
    fn group(&self, ids: &[String], _window_len: usize) -> Result<Vec<Vec<String>>, EvalError> {
        let mut soft = Vec::new();
        let mut loud = Vec::new();
        for id in ids {
            let level = self
                .levels
                .get(id)
                .ok_or_else(|| EvalError::Collaborator(format!("unknown segment {id}")))?;
            if *level < self.threshold {
                soft.push(id.clone());
            } else {
                loud.push(id.clone());
            }
        }
        Ok(vec![soft, loud])
    }
}

fn segment(amplitude: f32) -> Vec<f32> {
    (0..64)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect()
}

#[test]
fn collaborator_pipeline_feeds_the_report() {
    let segments = [
        ("hit_01", 0.10f32),
        ("hit_02", 0.12),
        ("hit_03", 0.11),
        ("hit_04", 0.85),
        ("hit_05", 0.90),
        ("hit_06", 0.88),
    ];
    let extractor = LevelExtractor;
    let raw: Vec<SegmentFeatures> = segments
        .iter()
        .map(|(_, a)| extractor.extract(&segment(*a), 44_100, 32).unwrap())
        .collect();
    let normalized = ZScoreNormalizer.normalize(&raw);

    let ids: Vec<String> = segments.iter().map(|(id, _)| id.to_string()).collect();
    let samples = SampleSet::new(
        ids.iter()
            .zip(normalized.iter().zip(raw.iter()))
            .map(|(id, (n, r))| Sample::from_features(id.as_str(), n, Some(r)))
            .collect(),
    )
    .unwrap();

    let grouper = ThresholdGrouper {
        levels: ids.iter().cloned().zip(raw.iter().map(|f| f.rms)).collect(),
        threshold: 0.5,
    };
    let automatic = LabelAssignment::from_groups(&grouper.group(&ids, 32).unwrap());
    let manual = groups(&[&["hit_01", "hit_02", "hit_03"], &["hit_04", "hit_05", "hit_06"]]);

    let m = ComparisonReportBuilder::new()
        .build(&manual, &automatic, &samples)
        .unwrap();
    assert!((m.external.ari - 1.0).abs() < EPS);
    assert!(m.internal_automatic.silhouette > 0.9);
    let first = &m.samples[0];
    assert!((first.raw.unwrap().rms - 0.10).abs() < 1e-6);
}

#[test]
fn collaborator_errors_propagate() {
    assert!(matches!(
        LevelExtractor.extract(&[], 44_100, 32),
        Err(EvalError::Collaborator(_))
    ));
    let grouper = ThresholdGrouper {
        levels: BTreeMap::new(),
        threshold: 0.5,
    };
    assert!(matches!(
        grouper.group(&["missing".to_string()], 32),
        Err(EvalError::Collaborator(_))
    ));
}
