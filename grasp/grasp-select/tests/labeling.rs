//! Labeling chunks of a synthetic dataset end to end.
//!
//! Run with: cargo test -p grasp-select --test labeling

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use grasp_bandit::OracleError;
use grasp_select::{
    Algorithm, BanditConfig, ContactWrenches, CorrelatedExperimentResult, GraspCandidate,
    GraspTrial, GraspableObject, InMemorySource, ObjectSource, PriorComputation, QualityMetric,
    QualityTrial, SelectError, SelectResult, label_chunk, label_object,
};
use nalgebra::{DVector, Matrix3xX, Vector3};
use proptest::prelude::*;
use rand::RngCore;

// =============================================================================
// Fixtures
// =============================================================================

const CONFIG: &str = r#"{
    "bandit_max_iter": 80,
    "bandit_confidence": 0.95,
    "bandit_snapshot_rate": 20,
    "kernel_sigma": 1.0,
    "kernel_l": 1.0,
    "kernel_tolerance": 0.5,
    "seed": 11,
    "prior_num_neighbors": 2
}"#;

fn v(values: &[f64]) -> DVector<f64> {
    DVector::from_column_slice(values)
}

/// Two clusters of grasps: good ones near the origin, poor ones far away.
fn clustered_object(key: &str, offset: f64) -> GraspableObject {
    GraspableObject::new(key)
        .with_category("mugs")
        .with_features(v(&[offset, 0.0]))
        .with_candidates(vec![
            GraspCandidate::new(0, 0.9)
                .with_features(v(&[0.0, 0.0, 0.0]))
                .with_counts(9.0, 1.0),
            GraspCandidate::new(1, 0.1)
                .with_features(v(&[6.0, 6.0, 6.0]))
                .with_counts(1.0, 9.0),
            GraspCandidate::new(2, 0.8)
                .with_features(v(&[0.1, 0.0, 0.0]))
                .with_counts(8.0, 2.0),
            GraspCandidate::new(3, 0.2)
                .with_features(v(&[6.0, 6.1, 6.0]))
                .with_counts(2.0, 8.0),
        ])
}

/// A dataset where one object cannot be read.
struct Dataset {
    objects: InMemorySource,
    broken: &'static str,
}

impl ObjectSource for Dataset {
    fn keys(&self) -> Vec<String> {
        self.objects.keys()
    }

    fn load(&self, key: &str) -> SelectResult<GraspableObject> {
        if key == self.broken {
            return Err(SelectError::object_unavailable(key, "corrupt grasp file"));
        }
        self.objects.load(key)
    }
}

fn dataset() -> Dataset {
    Dataset {
        objects: InMemorySource::new(vec![
            clustered_object("mug_a", 0.0),
            clustered_object("mug_b", 0.5),
            GraspableObject::new("ball")
                .with_features(v(&[9.0, 9.0]))
                .with_candidates(vec![GraspCandidate::new(0, 0.5)]),
            clustered_object("mug_c", 1.0),
        ]),
        broken: "mug_b",
    }
}

/// Trial that breaks for one candidate id.
struct BrokenGripper {
    broken_id: usize,
    attempts: usize,
}

impl GraspTrial for BrokenGripper {
    fn attempt(
        &mut self,
        arm: usize,
        candidate: &GraspCandidate,
        rng: &mut dyn RngCore,
    ) -> Result<bool, OracleError> {
        self.attempts += 1;
        if candidate.id == self.broken_id {
            return Err(OracleError::trial_failed(arm, "gripper fault"));
        }
        QualityTrial.attempt(arm, candidate, rng)
    }
}

// =============================================================================
// Chunks
// =============================================================================

#[test]
fn test_chunk_skips_unreadable_and_featureless() {
    let config = BanditConfig::from_json(CONFIG).unwrap();
    let results = label_chunk(&dataset(), &config, &mut QualityTrial, None).unwrap();

    let keys: Vec<&str> = results.iter().map(|r| r.obj_key.as_str()).collect();
    assert_eq!(keys, vec!["mug_a", "mug_c"]);
    for result in &results {
        assert_eq!(result.iters(), vec![0, 20, 40, 60, 80]);
        assert_eq!(result.components.len(), 2);
    }
}

#[test]
fn test_chunk_bounds() {
    let config = BanditConfig::from_json(CONFIG).unwrap();

    let middle = config.clone().with_chunk(1, Some(3));
    assert!(label_chunk(&dataset(), &middle, &mut QualityTrial, None)
        .unwrap()
        .is_empty());

    let tail = config.with_chunk(3, None);
    let results = label_chunk(&dataset(), &tail, &mut QualityTrial, None).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].obj_key, "mug_c");
}

#[test]
fn test_compiled_rewards_are_normalized() {
    let config = BanditConfig::from_json(CONFIG).unwrap();
    let results = label_chunk(&dataset(), &config, &mut QualityTrial, None).unwrap();
    let compiled = CorrelatedExperimentResult::compile(&results).unwrap();

    assert_eq!(compiled.num_objects, 2);
    assert_eq!(compiled.iters, vec![0, 20, 40, 60, 80]);
    for algorithm in Algorithm::ALL {
        let mean = compiled.mean_reward(algorithm);
        assert_eq!(mean.len(), 5);
        assert!(mean.iter().all(|r| (0.0..=1.0).contains(r)));
    }
}

#[test]
fn test_chunk_labels_any_feature_dimension() {
    let config = BanditConfig::from_json(CONFIG).unwrap();
    let wide = |x: f64| DVector::from_element(17, x);
    let source = InMemorySource::new(vec![
        clustered_object("a", 0.0),
        GraspableObject::new("b").with_candidates(vec![
            GraspCandidate::new(0, 0.9).with_features(wide(0.0)),
            GraspCandidate::new(1, 0.1).with_features(wide(4.0)),
            GraspCandidate::new(2, 0.8).with_features(wide(0.05)),
        ]),
    ]);

    let results = label_chunk(&source, &config, &mut QualityTrial, None).unwrap();
    let keys: Vec<&str> = results.iter().map(|r| r.obj_key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b"]);
    // The two close wide grasps are correlated, the far one is alone.
    assert_eq!(results[1].components.len(), 2);
}

#[test]
fn test_chunk_skips_object_that_fails_to_label() {
    let config = BanditConfig::from_json(CONFIG).unwrap();
    // Corrupt counts on a close neighbor make mug_a's transferred priors
    // negative, which only mug_a depends on.
    let mut tainted = clustered_object("tainted", 0.1);
    for candidate in &mut tainted.candidates {
        candidate.successes = -50.0;
        candidate.failures = -50.0;
    }
    let source = InMemorySource::new(vec![
        clustered_object("mug_a", 0.0),
        tainted,
        clustered_object("mug_c", 5.0),
    ]);
    let engine = PriorComputation::from_source(&source, &config).unwrap();

    let results = label_chunk(&source, &config, &mut QualityTrial, Some(&engine)).unwrap();
    let keys: Vec<&str> = results.iter().map(|r| r.obj_key.as_str()).collect();
    assert_eq!(keys, vec!["tainted", "mug_c"]);

    let invalid = config.with_max_iter(0);
    assert!(matches!(
        label_chunk(&source, &invalid, &mut QualityTrial, Some(&engine)),
        Err(SelectError::InvalidConfig(_))
    ));
}

// =============================================================================
// Failures and priors
// =============================================================================

#[test]
fn test_failing_trial_disables_only_that_arm() {
    let config = BanditConfig::from_json(CONFIG).unwrap();
    let object = clustered_object("mug_a", 0.0);
    let mut gripper = BrokenGripper {
        broken_id: 1,
        attempts: 0,
    };

    let result = label_object(&object, &config, &mut gripper, None)
        .unwrap()
        .unwrap();
    assert!(gripper.attempts > 0);

    let uniform = &result.run(Algorithm::UniformAllocation).unwrap().result;
    assert_eq!(uniform.disabled_arms, vec![1]);
    assert_eq!(uniform.iterations, 80);
    assert!(result
        .best_grasps(Algorithm::UniformAllocation, 4)
        .iter()
        .all(|&(id, _)| id != 1));
}

#[test]
fn test_priors_from_neighbor_objects() {
    let config = BanditConfig::from_json(CONFIG).unwrap();
    let source = dataset();
    let engine = PriorComputation::from_source(&source, &config).unwrap();

    let object = source.load("mug_a").unwrap();
    let estimate = engine.compute_priors(&object, &source).unwrap();
    assert_eq!(estimate.len(), 4);
    assert!(!estimate.neighbor_keys.contains(&"mug_a".to_string()));
    // The good cluster inherits mostly successes, the poor one failures.
    assert!(estimate.alpha[0] > estimate.beta[0]);
    assert!(estimate.beta[1] > estimate.alpha[1]);

    let results = label_chunk(&source, &config, &mut QualityTrial, Some(&engine)).unwrap();
    assert_eq!(results.len(), 2);
    for result in &results {
        for run in &result.runs {
            assert!(matches!(run.result.snapshots[0].best_arm, Some(0 | 2)));
        }
    }
}

// =============================================================================
// Quality metrics
// =============================================================================

fn arb_wrenches() -> impl Strategy<Value = ContactWrenches> {
    prop::collection::vec(prop::array::uniform6(-5.0f64..5.0), 1..10).prop_map(|columns| {
        let forces: Vec<Vector3<f64>> = columns
            .iter()
            .map(|c| Vector3::new(c[0], c[1], c[2]))
            .collect();
        let torques: Vec<Vector3<f64>> = columns
            .iter()
            .map(|c| Vector3::new(c[3], c[4], c[5]))
            .collect();
        ContactWrenches::new(
            Matrix3xX::from_columns(&forces),
            Matrix3xX::from_columns(&torques),
        )
        .unwrap()
    })
}

proptest! {
    #[test]
    fn proptest_isotropy_is_a_ratio(wrenches in arb_wrenches()) {
        let isotropy = QualityMetric::GraspIsotropy.evaluate(&wrenches);
        prop_assert!((0.0..=1.0 + 1e-12).contains(&isotropy));
    }

    #[test]
    fn proptest_force_closure_is_binary(wrenches in arb_wrenches()) {
        let closure = QualityMetric::default().evaluate(&wrenches);
        prop_assert!(closure == 0.0 || closure == 1.0);
    }
}
