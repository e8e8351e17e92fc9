use grasp_kernel::CorrelationNeighborhoods;
use rand::Rng;

use super::{AdaptiveSampler, SamplerCore, StepOutcome};
use crate::belief::BetaBernoulliModel;
use crate::error::{BanditError, BanditResult};
use crate::objective::Objective;
use crate::oracle::Oracle;
use crate::result::Algorithm;

/// Thompson sampling whose outcomes spread over kernel neighborhoods.
///
/// Arm selection is the same as [`super::ThompsonSampling`]. After a trial,
/// every arm in the tried arm's neighborhood receives the outcome weighted by
/// its kernel value, so one trial refines a whole cluster of similar grasps.
/// The neighborhoods are borrowed and never modified.
#[derive(Debug, Clone)]
pub struct CorrelatedThompsonSampling<'a, R> {
    core: SamplerCore<R>,
    neighborhoods: &'a CorrelationNeighborhoods,
}

impl<'a, R: Rng> CorrelatedThompsonSampling<'a, R> {
    /// Creates a sampler with one arm per neighborhood row and uniform
    /// priors.
    ///
    /// # Errors
    ///
    /// Returns [`BanditError::NoArms`] if there are no rows.
    pub fn new(neighborhoods: &'a CorrelationNeighborhoods, rng: R) -> BanditResult<Self> {
        let model = BetaBernoulliModel::new(neighborhoods.len())
            .with_kernel_tolerance(neighborhoods.tolerance())?;
        Self::with_model(model, neighborhoods, rng)
    }

    /// Creates a sampler starting from `model`'s priors.
    ///
    /// # Errors
    ///
    /// Returns an error if the model has no arms or its arm count differs
    /// from the number of neighborhood rows.
    pub fn with_model(
        model: BetaBernoulliModel,
        neighborhoods: &'a CorrelationNeighborhoods,
        rng: R,
    ) -> BanditResult<Self> {
        if neighborhoods.len() != model.num_arms() {
            return Err(BanditError::LengthMismatch {
                expected: model.num_arms(),
                found: neighborhoods.len(),
            });
        }
        Ok(Self {
            core: SamplerCore::new(model, rng)?,
            neighborhoods,
        })
    }

    /// Sets how ties between posterior draws are broken.
    #[must_use]
    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.core.objective = objective;
        self
    }

    /// Neighborhoods used for correlated updates.
    #[must_use]
    pub const fn neighborhoods(&self) -> &'a CorrelationNeighborhoods {
        self.neighborhoods
    }
}

impl<R: Rng> AdaptiveSampler for CorrelatedThompsonSampling<'_, R> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::CorrelatedThompsonSampling
    }

    fn model(&self) -> &BetaBernoulliModel {
        &self.core.model
    }

    fn selectable(&self) -> &[bool] {
        &self.core.selectable
    }

    fn reset(&mut self) {
        self.core.reset();
    }

    fn step(&mut self, oracle: &mut dyn Oracle) -> BanditResult<StepOutcome> {
        let Some(arm) = self.core.thompson_arm() else {
            return Ok(StepOutcome::Exhausted);
        };
        match self.core.trial(oracle, arm, self.algorithm()) {
            Some(success) => {
                self.core
                    .model
                    .propagate(arm, success, self.neighborhoods.row(arm))?;
                Ok(StepOutcome::Observed { arm, success })
            }
            None => Ok(StepOutcome::ArmDisabled { arm }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::BernoulliOracle;
    use grasp_kernel::{FeatureIndex, SquaredExponentialKernel};
    use nalgebra::DVector;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn paired_neighborhoods() -> CorrelationNeighborhoods {
        let features = vec![
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![10.0, 10.0]),
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![10.0, 10.0]),
        ];
        let index = FeatureIndex::<2>::with_features(&features).unwrap();
        let kernel = SquaredExponentialKernel::new(1.0, 1.0).unwrap();
        CorrelationNeighborhoods::build(&index, &kernel, &features, 0.5).unwrap()
    }

    #[test]
    fn test_outcome_shared_with_twin() {
        let hoods = paired_neighborhoods();
        let mut oracle = BernoulliOracle::new(vec![1.0; 4]).unwrap();
        let mut sampler =
            CorrelatedThompsonSampling::new(&hoods, ChaCha8Rng::seed_from_u64(3)).unwrap();

        let StepOutcome::Observed { arm, .. } = sampler.step(&mut oracle).unwrap() else {
            panic!("expected an observation");
        };
        let twin = (arm + 2) % 4;
        let model = sampler.model();
        assert_eq!(model.successes()[arm], 1.0);
        assert_eq!(model.successes()[twin], 1.0);
        for other in [(arm + 1) % 4, (arm + 3) % 4] {
            assert_eq!(model.observations(other), 0.0);
        }
    }

    #[test]
    fn test_model_size_must_match() {
        let hoods = paired_neighborhoods();
        let model = BetaBernoulliModel::new(3);
        assert!(matches!(
            CorrelatedThompsonSampling::with_model(model, &hoods, ChaCha8Rng::seed_from_u64(0)),
            Err(BanditError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_shared_neighborhoods_across_runs() {
        let hoods = paired_neighborhoods();
        let mut a = CorrelatedThompsonSampling::new(&hoods, ChaCha8Rng::seed_from_u64(1)).unwrap();
        let mut b = CorrelatedThompsonSampling::new(&hoods, ChaCha8Rng::seed_from_u64(1)).unwrap();
        let mut oracle_a = BernoulliOracle::new(vec![0.9, 0.1, 0.85, 0.2]).unwrap();
        let mut oracle_b = oracle_a.clone();
        for _ in 0..25 {
            assert_eq!(
                a.step(&mut oracle_a).unwrap(),
                b.step(&mut oracle_b).unwrap()
            );
        }
        assert_eq!(a.model(), b.model());
    }
}
