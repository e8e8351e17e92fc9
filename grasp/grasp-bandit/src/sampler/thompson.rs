use rand::Rng;

use super::{AdaptiveSampler, SamplerCore, StepOutcome};
use crate::belief::BetaBernoulliModel;
use crate::error::BanditResult;
use crate::objective::Objective;
use crate::oracle::Oracle;
use crate::result::Algorithm;

/// Thompson sampling with one independent Beta posterior per arm.
///
/// Each iteration draws once from every selectable arm's posterior and
/// tries the arm with the largest draw.
#[derive(Debug, Clone)]
pub struct ThompsonSampling<R> {
    core: SamplerCore<R>,
}

impl<R: Rng> ThompsonSampling<R> {
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
        })
    }

    /// Sets how ties between posterior draws are broken.
    #[must_use]
    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.core.objective = objective;
        self
    }
}

impl<R: Rng> AdaptiveSampler for ThompsonSampling<R> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::ThompsonSampling
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
                self.core.model.independent_update(arm, success)?;
                Ok(StepOutcome::Observed { arm, success })
            }
            None => Ok(StepOutcome::ArmDisabled { arm }),
        }
    }
}
