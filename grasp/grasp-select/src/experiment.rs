//! Labeling experiments: run every sampler on an object and compare.
//!
//! [`label_object`] turns one object into a [`CorrelatedExperimentResult`]:
//! usable candidates are indexed, their kernel neighborhoods computed, and
//! Uniform Allocation, Thompson Sampling and Correlated Thompson Sampling
//! each spend the configured trial budget. Reward curves are scored
//! against the candidates' quality labels, which the samplers never see.

use std::time::Instant;

use grasp_bandit::{
    AdaptiveSampler, Algorithm, BetaBernoulliModel, CorrelatedThompsonSampling, SamplingResult,
    ThompsonSampling, UniformAllocation,
};
use grasp_kernel::{
    CorrelationNeighborhoods, Kernel, KernelMatrix, SquaredExponentialKernel,
    SymmetricSquaredExponentialKernel, build_feature_index, correlated_components,
};
use nalgebra::DVector;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::candidate::{CandidateOracle, GraspCandidate, GraspTrial, alternate_map};
use crate::config::BanditConfig;
use crate::dataset::{GraspableObject, ObjectSequence, ObjectSource};
use crate::error::SelectResult;
use crate::prior::{PriorComputation, PriorEstimate};

/// Quality of the leading arm at every snapshot.
///
/// A snapshot without a leader scores 0. With `normalize`, the curve is
/// divided by the best quality among the arms so that 1 means "found the
/// best grasp".
#[must_use]
pub fn reward_vs_iters(result: &SamplingResult, true_pfc: &[f64], normalize: bool) -> Vec<f64> {
    let rewards: Vec<f64> = result
        .snapshots
        .iter()
        .map(|s| {
            s.best_arm
                .and_then(|arm| true_pfc.get(arm).copied())
                .unwrap_or(0.0)
        })
        .collect();
    if !normalize {
        return rewards;
    }
    let best = true_pfc.iter().copied().fold(0.0, f64::max);
    if best > 0.0 {
        rewards.into_iter().map(|r| r / best).collect()
    } else {
        rewards
    }
}

/// One sampler's run on one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmRun {
    /// The sampler's result.
    pub result: SamplingResult,
    /// Normalized reward at each snapshot.
    pub normalized_reward: Vec<f64>,
}

/// Results of every sampler on one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedExperimentResult {
    /// Object key.
    pub obj_key: String,
    /// Candidate id of every arm.
    pub candidate_ids: Vec<usize>,
    /// Quality label of every arm.
    pub qualities: Vec<f64>,
    /// Runs in [`Algorithm::ALL`] order.
    pub runs: Vec<AlgorithmRun>,
    /// Pairwise kernel values between arms.
    pub kernel_matrix: KernelMatrix,
    /// Clusters of mutually correlated arms.
    pub components: Vec<Vec<usize>>,
}

impl CorrelatedExperimentResult {
    /// Run of `algorithm`, if it was part of the experiment.
    #[must_use]
    pub fn run(&self, algorithm: Algorithm) -> Option<&AlgorithmRun> {
        self.runs.iter().find(|r| r.result.algorithm == algorithm)
    }

    /// Normalized reward curve of `algorithm` (empty if it did not run).
    #[must_use]
    pub fn reward(&self, algorithm: Algorithm) -> &[f64] {
        self.run(algorithm)
            .map(|r| r.normalized_reward.as_slice())
            .unwrap_or_default()
    }

    /// Snapshot iterations of the first run.
    #[must_use]
    pub fn iters(&self) -> Vec<usize> {
        self.runs
            .first()
            .map(|r| r.result.iters())
            .unwrap_or_default()
    }

    /// Top `k` candidates of `algorithm` as (candidate id, posterior mean).
    #[must_use]
    pub fn best_grasps(&self, algorithm: Algorithm, k: usize) -> Vec<(usize, f64)> {
        self.run(algorithm)
            .map(|r| {
                r.result
                    .best_candidates(k)
                    .into_iter()
                    .filter_map(|(arm, mean)| Some((*self.candidate_ids.get(arm)?, mean)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serializes the result as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> SelectResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a result from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> SelectResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Stacks the reward curves of several objects.
    ///
    /// Returns `None` for an empty slice. Iterations are taken from the
    /// first result.
    #[must_use]
    pub fn compile(results: &[Self]) -> Option<CompiledResults> {
        let first = results.first()?;
        let curves = |algorithm| {
            results
                .iter()
                .map(|r| r.reward(algorithm).to_vec())
                .collect::<Vec<_>>()
        };
        Some(CompiledResults {
            obj_keys: results.iter().map(|r| r.obj_key.clone()).collect(),
            num_objects: results.len(),
            iters: first.iters(),
            ua_reward: curves(Algorithm::UniformAllocation),
            ts_reward: curves(Algorithm::ThompsonSampling),
            ts_corr_reward: curves(Algorithm::CorrelatedThompsonSampling),
        })
    }
}

/// Reward curves of many objects, one row per object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledResults {
    /// Object keys, in row order.
    pub obj_keys: Vec<String>,
    /// Number of objects.
    pub num_objects: usize,
    /// Snapshot iterations.
    pub iters: Vec<usize>,
    /// Uniform Allocation curves.
    pub ua_reward: Vec<Vec<f64>>,
    /// Thompson Sampling curves.
    pub ts_reward: Vec<Vec<f64>>,
    /// Correlated Thompson Sampling curves.
    pub ts_corr_reward: Vec<Vec<f64>>,
}

impl CompiledResults {
    /// Curves of `algorithm`.
    #[must_use]
    pub fn rewards(&self, algorithm: Algorithm) -> &[Vec<f64>] {
        match algorithm {
            Algorithm::UniformAllocation => &self.ua_reward,
            Algorithm::ThompsonSampling => &self.ts_reward,
            Algorithm::CorrelatedThompsonSampling => &self.ts_corr_reward,
        }
    }

    /// Mean curve of `algorithm` over objects, truncated to the shortest
    /// curve.
    #[must_use]
    pub fn mean_reward(&self, algorithm: Algorithm) -> Vec<f64> {
        let rows = self.rewards(algorithm);
        let Some(len) = rows.iter().map(Vec::len).min() else {
            return Vec::new();
        };
        let count = rows.len() as f64;
        (0..len)
            .map(|i| rows.iter().map(|row| row[i]).sum::<f64>() / count)
            .collect()
    }
}

/// Candidates that can take part in a bandit run, with their positions in
/// the object's candidate list.
fn usable_candidates(object: &GraspableObject) -> (Vec<usize>, Vec<GraspCandidate>) {
    let dim = object
        .candidates
        .iter()
        .find_map(|c| c.usable_features().map(DVector::len));
    let mut positions = Vec::new();
    let mut usable = Vec::new();
    for (i, candidate) in object.candidates.iter().enumerate() {
        match candidate.usable_features() {
            Some(features) if Some(features.len()) == dim => {
                positions.push(i);
                usable.push(candidate.clone());
            }
            Some(features) => warn!(
                key = %object.key,
                candidate = candidate.id,
                dim = features.len(),
                "Candidate feature dimension differs, excluded"
            ),
            None => warn!(
                key = %object.key,
                candidate = candidate.id,
                "Candidate has no usable features, excluded"
            ),
        }
    }
    (positions, usable)
}

/// Starting belief for every sampler.
fn initial_model(
    priors: Option<&PriorEstimate>,
    positions: &[usize],
    tolerance: f64,
) -> SelectResult<BetaBernoulliModel> {
    let model = match priors {
        Some(priors) => priors.model_for(positions)?,
        None => BetaBernoulliModel::new(positions.len()),
    };
    Ok(model.with_kernel_tolerance(tolerance)?)
}

/// Runs the three samplers on one object.
///
/// Returns `Ok(None)` if the object has no usable candidates. Candidates
/// without features are excluded with a warning; trials that fail disable
/// their arm for the rest of that run.
///
/// # Errors
///
/// Returns an error for an invalid configuration or unusable priors.
pub fn label_object(
    object: &GraspableObject,
    config: &BanditConfig,
    trial: &mut dyn GraspTrial,
    priors: Option<&PriorEstimate>,
) -> SelectResult<Option<CorrelatedExperimentResult>> {
    config.validate()?;
    let start = Instant::now();

    let (positions, candidates) = usable_candidates(object);
    if candidates.is_empty() {
        info!(key = %object.key, "No usable candidates, skipping object");
        return Ok(None);
    }
    let features: Vec<DVector<f64>> = candidates
        .iter()
        .filter_map(|c| c.usable_features().cloned())
        .collect();

    let alternate = config.grasp_symmetry.then(|| alternate_map(&candidates));
    let kernel: Box<dyn Kernel> = match &alternate {
        Some(map) => Box::new(
            SymmetricSquaredExponentialKernel::new(config.kernel_sigma, config.kernel_l)?
                .with_alternate(map.clone()),
        ),
        None => Box::new(SquaredExponentialKernel::new(
            config.kernel_sigma,
            config.kernel_l,
        )?),
    };
    let index = build_feature_index(&features, alternate)?;
    let hoods =
        CorrelationNeighborhoods::build(&*index, &*kernel, &features, config.kernel_tolerance)?;
    let kernel_matrix = KernelMatrix::compute(&*kernel, &features);
    let components = correlated_components(&hoods);

    info!(
        key = %object.key,
        candidates = candidates.len(),
        excluded = object.candidates.len() - candidates.len(),
        components = components.len(),
        mean_neighbors = hoods.mean_row_len(),
        "Labeling object"
    );

    let seed = config.seed.unwrap_or_else(rand::random);
    let rng = |k: u64| ChaCha8Rng::seed_from_u64(seed.wrapping_add(k));
    let termination = config.termination()?;
    let params = config.solve_params();
    let model = initial_model(priors, &positions, config.kernel_tolerance)?;

    let mut samplers: Vec<Box<dyn AdaptiveSampler + '_>> = vec![
        Box::new(UniformAllocation::with_model(model.clone(), rng(0))?),
        Box::new(ThompsonSampling::with_model(model.clone(), rng(1))?),
        Box::new(CorrelatedThompsonSampling::with_model(model, &hoods, rng(2))?),
    ];

    let qualities: Vec<f64> = candidates.iter().map(|c| c.quality).collect();
    let mut runs = Vec::with_capacity(samplers.len());
    for sampler in &mut samplers {
        let mut oracle = CandidateOracle::new(&candidates, &mut *trial);
        let result = sampler.solve(&mut oracle, &termination, &params)?;
        let normalized_reward = reward_vs_iters(&result, &qualities, true);
        runs.push(AlgorithmRun {
            result,
            normalized_reward,
        });
    }

    info!(
        key = %object.key,
        elapsed_ms = start.elapsed().as_millis(),
        "Object labeled"
    );
    Ok(Some(CorrelatedExperimentResult {
        obj_key: object.key.clone(),
        candidate_ids: candidates.iter().map(|c| c.id).collect(),
        qualities,
        runs,
        kernel_matrix,
        components,
    }))
}

/// Labels the configured chunk of `source`.
///
/// Unreadable objects, objects without usable candidates and objects whose
/// labeling fails for reasons other than configuration are skipped with a
/// warning. With `priors`, each object's samplers start from priors transferred
/// from its neighbor objects.
///
/// # Errors
///
/// Returns an error for an invalid configuration.
pub fn label_chunk<S: ObjectSource + ?Sized>(
    source: &S,
    config: &BanditConfig,
    trial: &mut dyn GraspTrial,
    priors: Option<&PriorComputation>,
) -> SelectResult<Vec<CorrelatedExperimentResult>> {
    config.validate()?;
    let start = Instant::now();
    let mut sequence = ObjectSequence::new(source, config.chunk_start, config.chunk_end);
    let mut results = Vec::new();

    let mut failed = 0;
    for object in sequence.by_ref() {
        let labeled = priors
            .map(|engine| engine.compute_priors(&object, source))
            .transpose()
            .and_then(|estimate| label_object(&object, config, trial, estimate.as_ref()));
        match labeled {
            Ok(Some(result)) => results.push(result),
            Ok(None) => {}
            Err(e) if e.is_config() => return Err(e),
            Err(e) => {
                warn!(key = %object.key, error = %e, "Skipping object that failed to label");
                failed += 1;
            }
        }
    }

    info!(
        labeled = results.len(),
        skipped = sequence.skipped().len(),
        failed,
        elapsed_ms = start.elapsed().as_millis(),
        "Chunk labeled"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::QualityTrial;
    use approx::assert_relative_eq;
    use grasp_bandit::{Snapshot, StopReason};

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(values)
    }

    fn result_with_leaders(leaders: &[Option<usize>]) -> SamplingResult {
        SamplingResult {
            algorithm: Algorithm::ThompsonSampling,
            snapshots: leaders
                .iter()
                .enumerate()
                .map(|(i, &best_arm)| Snapshot {
                    iteration: i * 10,
                    best_arm,
                    best_mean: 0.5,
                })
                .collect(),
            iterations: 10 * leaders.len(),
            final_means: vec![0.5; 3],
            ranked_arms: vec![0, 1, 2],
            disabled_arms: Vec::new(),
            stop_reason: StopReason::Condition,
        }
    }

    fn object() -> GraspableObject {
        GraspableObject::new("mug").with_candidates(vec![
            GraspCandidate::new(10, 0.9).with_features(v(&[0.0, 0.0])),
            GraspCandidate::new(11, 0.1).with_features(v(&[5.0, 5.0])),
            GraspCandidate::new(12, 0.85).with_features(v(&[0.0, 0.0])),
            GraspCandidate::new(13, 0.5),
            GraspCandidate::new(14, 0.2).with_features(v(&[5.0, 5.0])),
        ])
    }

    fn config() -> BanditConfig {
        BanditConfig::default()
            .with_max_iter(60)
            .with_snapshot_rate(10)
            .with_kernel(1.0, 1.0, 0.5)
            .with_seed(3)
    }

    #[test]
    fn test_reward_vs_iters() {
        let result = result_with_leaders(&[None, Some(1), Some(0)]);
        let pfc = [0.8, 0.4, 0.1];
        assert_eq!(reward_vs_iters(&result, &pfc, false), vec![0.0, 0.4, 0.8]);
        let normalized = reward_vs_iters(&result, &pfc, true);
        assert_relative_eq!(normalized[1], 0.5);
        assert_relative_eq!(normalized[2], 1.0);

        assert_eq!(reward_vs_iters(&result, &[0.0; 3], true), vec![0.0; 3]);
    }

    #[test]
    fn test_label_object_excludes_featureless() {
        let result = label_object(&object(), &config(), &mut QualityTrial, None)
            .unwrap()
            .unwrap();
        assert_eq!(result.candidate_ids, vec![10, 11, 12, 14]);
        assert_eq!(result.runs.len(), 3);
        assert_eq!(result.kernel_matrix.size(), 4);
        assert_eq!(result.components.len(), 2);
        for (run, algorithm) in result.runs.iter().zip(Algorithm::ALL) {
            assert_eq!(run.result.algorithm, algorithm);
            assert_eq!(run.result.iterations, 60);
            assert_eq!(run.normalized_reward.len(), 7);
        }
        assert_eq!(result.iters(), vec![0, 10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_label_object_is_seeded() {
        let a = label_object(&object(), &config(), &mut QualityTrial, None).unwrap();
        let b = label_object(&object(), &config(), &mut QualityTrial, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_label_object_without_candidates() {
        let empty = GraspableObject::new("plate");
        assert!(label_object(&empty, &config(), &mut QualityTrial, None)
            .unwrap()
            .is_none());

        let featureless =
            GraspableObject::new("sphere").with_candidates(vec![GraspCandidate::new(0, 0.5)]);
        assert!(label_object(&featureless, &config(), &mut QualityTrial, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = config().with_max_iter(0);
        assert!(label_object(&object(), &config, &mut QualityTrial, None).is_err());
    }

    #[test]
    fn test_symmetric_kernel_joins_twins() {
        let object = GraspableObject::new("bar").with_candidates(vec![
            GraspCandidate::new(0, 0.8).with_features(v(&[1.0, 2.0, 3.0, 4.0])),
            GraspCandidate::new(1, 0.8).with_features(v(&[3.0, 4.0, 1.0, 2.0])),
        ]);
        let plain = label_object(&object, &config(), &mut QualityTrial, None)
            .unwrap()
            .unwrap();
        assert_eq!(plain.components.len(), 2);

        let symmetric = label_object(&object, &config().with_symmetry(true), &mut QualityTrial, None)
            .unwrap()
            .unwrap();
        assert_eq!(symmetric.components.len(), 1);
        assert_relative_eq!(symmetric.kernel_matrix.get(0, 1), 1.0);
    }

    #[test]
    fn test_priors_shape_the_start() {
        let priors = PriorEstimate {
            alpha: vec![50.0, 1.0, 1.0, 1.0, 1.0],
            beta: vec![1.0, 50.0, 1.0, 1.0, 1.0],
            neighbor_keys: Vec::new(),
            neighbor_kernels: Vec::new(),
            neighbor_counts: vec![0; 5],
        };
        let result = label_object(&object(), &config(), &mut QualityTrial, Some(&priors))
            .unwrap()
            .unwrap();
        // Strong prior on candidate 10 makes it the leader before any trial.
        for run in &result.runs {
            assert_eq!(run.result.snapshots[0].best_arm, Some(0));
        }
    }

    #[test]
    fn test_compile_and_mean() {
        let result = label_object(&object(), &config(), &mut QualityTrial, None)
            .unwrap()
            .unwrap();
        let mut other = result.clone();
        other.obj_key = "mug_2".to_string();
        for run in &mut other.runs {
            run.normalized_reward.truncate(3);
        }

        let compiled = CorrelatedExperimentResult::compile(&[result.clone(), other]).unwrap();
        assert_eq!(compiled.num_objects, 2);
        assert_eq!(compiled.obj_keys, vec!["mug", "mug_2"]);
        let mean = compiled.mean_reward(Algorithm::CorrelatedThompsonSampling);
        assert_eq!(mean.len(), 3);
        assert_relative_eq!(
            mean[2],
            result.reward(Algorithm::CorrelatedThompsonSampling)[2]
        );

        assert!(CorrelatedExperimentResult::compile(&[]).is_none());
    }

    #[test]
    fn test_json_roundtrip() {
        let result = label_object(&object(), &config(), &mut QualityTrial, None)
            .unwrap()
            .unwrap();
        let restored = CorrelatedExperimentResult::from_json(&result.to_json().unwrap()).unwrap();
        assert_eq!(restored.obj_key, result.obj_key);
        assert_eq!(restored.candidate_ids, result.candidate_ids);
        assert_eq!(restored.components, result.components);
        for (a, b) in restored.runs.iter().zip(&result.runs) {
            assert_eq!(a.result.best_arms(), b.result.best_arms());
            assert_eq!(a.result.stop_reason, b.result.stop_reason);
        }
        assert_relative_eq!(
            restored.kernel_matrix.get(0, 2),
            result.kernel_matrix.get(0, 2),
            epsilon = 1e-12
        );
        assert!(!result.best_grasps(Algorithm::ThompsonSampling, 2).is_empty());
    }
}
