//! Grasp candidates and the trial seam that evaluates them.

use std::collections::HashMap;
use std::sync::Arc;

use grasp_bandit::{Oracle, OracleError};
use grasp_kernel::{FeatureMap, swap_halves};
use nalgebra::DVector;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// One candidate grasp on one object.
///
/// `quality` is a ground-truth or proxy probability of force closure. The
/// samplers never see it; it is used to score their picks afterwards and by
/// [`QualityTrial`] for offline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraspCandidate {
    /// Grasp identifier, unique within its object.
    pub id: usize,
    /// Feature vector; candidates without one are left out of bandit runs.
    pub features: Option<DVector<f64>>,
    /// Features of the same grasp with its jaws relabeled.
    pub alternate_features: Option<DVector<f64>>,
    /// Probability of force closure.
    pub quality: f64,
    /// Successes observed in earlier labeling, used as prior evidence.
    #[serde(default)]
    pub successes: f64,
    /// Failures observed in earlier labeling, used as prior evidence.
    #[serde(default)]
    pub failures: f64,
}

impl GraspCandidate {
    /// Creates a candidate with no features and no recorded trials.
    #[must_use]
    pub const fn new(id: usize, quality: f64) -> Self {
        Self {
            id,
            features: None,
            alternate_features: None,
            quality,
            successes: 0.0,
            failures: 0.0,
        }
    }

    /// Sets the feature vector.
    #[must_use]
    pub fn with_features(mut self, features: DVector<f64>) -> Self {
        self.features = Some(features);
        self
    }

    /// Sets the relabeled feature vector.
    #[must_use]
    pub fn with_alternate_features(mut self, alternate: DVector<f64>) -> Self {
        self.alternate_features = Some(alternate);
        self
    }

    /// Sets the recorded trial counts.
    #[must_use]
    pub const fn with_counts(mut self, successes: f64, failures: f64) -> Self {
        self.successes = successes;
        self.failures = failures;
        self
    }

    /// The feature vector, if it is non-empty and finite.
    #[must_use]
    pub fn usable_features(&self) -> Option<&DVector<f64>> {
        self.features
            .as_ref()
            .filter(|f| !f.is_empty() && f.iter().all(|x| x.is_finite()))
    }
}

fn feature_key(features: &DVector<f64>) -> Vec<u64> {
    features.iter().map(|x| x.to_bits()).collect()
}

/// Relabeling map for a candidate set.
///
/// Candidates that carry explicit alternate features are relabeled with
/// them; every other vector falls back to [`swap_halves`].
#[must_use]
pub fn alternate_map(candidates: &[GraspCandidate]) -> FeatureMap {
    let known: HashMap<Vec<u64>, DVector<f64>> = candidates
        .iter()
        .filter_map(|c| {
            let features = c.usable_features()?;
            let alternate = c.alternate_features.as_ref()?;
            (alternate.len() == features.len()).then(|| (feature_key(features), alternate.clone()))
        })
        .collect();

    if known.is_empty() {
        return Arc::new(swap_halves);
    }
    Arc::new(move |features: &DVector<f64>| {
        known
            .get(&feature_key(features))
            .cloned()
            .unwrap_or_else(|| swap_halves(features))
    })
}

/// Runs one physical or simulated trial of a grasp.
///
/// This is where a physics simulator or a robot plugs in.
pub trait GraspTrial {
    /// Attempts `candidate` once and reports whether it held.
    ///
    /// `arm` is the candidate's position in the current run.
    ///
    /// # Errors
    ///
    /// Returns an [`OracleError`] if the trial could not be carried out.
    fn attempt(
        &mut self,
        arm: usize,
        candidate: &GraspCandidate,
        rng: &mut dyn RngCore,
    ) -> Result<bool, OracleError>;
}

/// Offline trial: succeeds with probability equal to the candidate's
/// quality label.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityTrial;

impl GraspTrial for QualityTrial {
    fn attempt(
        &mut self,
        arm: usize,
        candidate: &GraspCandidate,
        rng: &mut dyn RngCore,
    ) -> Result<bool, OracleError> {
        if !(0.0..=1.0).contains(&candidate.quality) {
            return Err(OracleError::trial_failed(
                arm,
                format!("quality {} is not a probability", candidate.quality),
            ));
        }
        Ok(rng.gen_bool(candidate.quality))
    }
}

/// Presents a candidate slice and a [`GraspTrial`] as a bandit [`Oracle`].
pub struct CandidateOracle<'a, T: GraspTrial + ?Sized> {
    candidates: &'a [GraspCandidate],
    trial: &'a mut T,
}

impl<'a, T: GraspTrial + ?Sized> CandidateOracle<'a, T> {
    /// Creates the oracle. Arm `i` is `candidates[i]`.
    pub fn new(candidates: &'a [GraspCandidate], trial: &'a mut T) -> Self {
        Self { candidates, trial }
    }
}

impl<T: GraspTrial + ?Sized> Oracle for CandidateOracle<'_, T> {
    fn num_arms(&self) -> usize {
        self.candidates.len()
    }

    fn trial(&mut self, arm: usize, rng: &mut dyn RngCore) -> Result<bool, OracleError> {
        let candidate = self.candidates.get(arm).ok_or(OracleError::UnknownArm(arm))?;
        self.trial.attempt(arm, candidate, rng)
    }
}
