use rand::Rng;

use super::{AdaptiveSampler, SamplerCore, StepOutcome};
use crate::belief::BetaBernoulliModel;
use crate::error::BanditResult;
use crate::objective::Objective;
use crate::oracle::Oracle;
use crate::result::Algorithm;

/// Tries every arm in turn, skipping disabled ones.
///
/// The baseline: no adaptivity and no kernel, so every arm receives the same
/// share of the trial budget.
#[derive(Debug, Clone)]
pub struct UniformAllocation<R> {
    core: SamplerCore<R>,
    cursor: usize,
}

impl<R: Rng> UniformAllocation<R> {
    /// Creates a sampler over `arms` arms with uniform priors.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BanditError::NoArms`] if `arms` is zero.
    pub fn new(arms: usize, rng: R) -> BanditResult<Self> {
        Self::with_model(BetaBernoulliModel::new(arms), rng)
    }

    /// Creates a sampler starting from `model`'s priors.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BanditError::NoArms`] if the model has no arms.
    pub fn with_model(model: BetaBernoulliModel, rng: R) -> BanditResult<Self> {
        Ok(Self {
            core: SamplerCore::new(model, rng)?,
            cursor: 0,
        })
    }

    /// Sets the objective. Round-robin selection ignores it; it is kept for
    /// parity with the other samplers.
    #[must_use]
    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.core.objective = objective;
        self
    }

    fn next_arm(&self) -> Option<usize> {
        let arms = self.core.selectable.len();
        (0..arms)
            .map(|offset| (self.cursor + offset) % arms)
            .find(|&arm| self.core.selectable[arm])
    }
}

impl<R: Rng> AdaptiveSampler for UniformAllocation<R> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::UniformAllocation
    }

    fn model(&self) -> &BetaBernoulliModel {
        &self.core.model
    }

    fn selectable(&self) -> &[bool] {
        &self.core.selectable
    }

    fn reset(&mut self) {
        self.core.reset();
        self.cursor = 0;
    }

    fn step(&mut self, oracle: &mut dyn Oracle) -> BanditResult<StepOutcome> {
        let Some(arm) = self.next_arm() else {
            return Ok(StepOutcome::Exhausted);
        };
        self.cursor = (arm + 1) % self.core.selectable.len();

        match self.core.trial(oracle, arm, self.algorithm()) {
            Some(success) => {
                self.core.model.independent_update(arm, success)?;
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
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_round_robin_order() {
        let mut oracle = BernoulliOracle::new(vec![0.5; 3]).unwrap();
        let mut sampler = UniformAllocation::new(3, ChaCha8Rng::seed_from_u64(1)).unwrap();
        let arms: Vec<usize> = (0..7)
            .map(|_| match sampler.step(&mut oracle).unwrap() {
                StepOutcome::Observed { arm, .. } => arm,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(arms, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_counts_equal_updates() {
        let mut oracle = BernoulliOracle::new(vec![0.3, 0.6, 0.9, 0.1]).unwrap();
        let mut sampler = UniformAllocation::new(4, ChaCha8Rng::seed_from_u64(2)).unwrap();
        for _ in 0..41 {
            sampler.step(&mut oracle).unwrap();
        }
        let model = sampler.model();
        assert_eq!(model.observations(0), 11.0);
        for arm in 1..4 {
            assert_eq!(model.observations(arm), 10.0);
        }
    }

    #[test]
    fn test_empty_rejected() {
        assert!(UniformAllocation::new(0, ChaCha8Rng::seed_from_u64(0)).is_err());
    }
}
