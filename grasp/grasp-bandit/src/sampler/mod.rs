//! Adaptive samplers that decide which grasp to try next.
//!
//! Every sampler runs the same loop: snapshot on a fixed cadence, ask the
//! termination condition, pick an arm, run one oracle trial and fold the
//! outcome into its beliefs. They differ only in how the arm is picked and
//! how far an outcome spreads.
//!
//! # Algorithms
//!
//! - **Uniform allocation**: round-robin over arms, independent updates
//! - **Thompson sampling**: argmax of posterior draws, independent updates
//! - **Correlated Thompson sampling**: argmax of posterior draws, each outcome
//!   shared with the tried arm's kernel neighborhood
//!
//! # Example
//!
//! ```
//! use grasp_bandit::{
//!     AdaptiveSampler, BernoulliOracle, MaxIterTerminationCondition, SolveParams,
//!     ThompsonSampling,
//! };
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let mut oracle = BernoulliOracle::new(vec![0.2, 0.9, 0.4]).unwrap();
//! let mut sampler = ThompsonSampling::new(3, StdRng::seed_from_u64(5)).unwrap();
//! let stop = MaxIterTerminationCondition::new(300);
//!
//! let result = sampler
//!     .solve(&mut oracle, &stop, &SolveParams::default().with_snapshot_rate(50))
//!     .unwrap();
//! assert_eq!(result.iterations, 300);
//! assert_eq!(result.ranked_arms[0], 1);
//! ```

mod correlated;
mod thompson;
mod uniform;

pub use correlated::CorrelatedThompsonSampling;
pub use thompson::ThompsonSampling;
pub use uniform::UniformAllocation;

use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::belief::BetaBernoulliModel;
use crate::error::{BanditError, BanditResult};
use crate::objective::{argmax, Objective};
use crate::oracle::Oracle;
use crate::result::{Algorithm, SamplingResult, Snapshot, StopReason};
use crate::termination::{TerminationCondition, TerminationState};

/// Loop parameters shared by all samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveParams {
    /// Iterations between snapshots.
    pub snapshot_rate: usize,
    /// Hard iteration cap applied on top of the termination condition.
    pub iteration_cap: usize,
}

impl Default for SolveParams {
    fn default() -> Self {
        Self {
            snapshot_rate: 1,
            iteration_cap: 10_000,
        }
    }
}

impl SolveParams {
    /// Sets the snapshot cadence.
    #[must_use]
    pub const fn with_snapshot_rate(mut self, snapshot_rate: usize) -> Self {
        self.snapshot_rate = snapshot_rate;
        self
    }

    /// Sets the hard iteration cap.
    #[must_use]
    pub const fn with_iteration_cap(mut self, iteration_cap: usize) -> Self {
        self.iteration_cap = iteration_cap;
        self
    }

    /// Checks that both values are positive.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is zero.
    pub fn validate(&self) -> BanditResult<()> {
        if self.snapshot_rate == 0 {
            return Err(BanditError::invalid_parameter(
                "snapshot rate must be positive",
            ));
        }
        if self.iteration_cap == 0 {
            return Err(BanditError::invalid_parameter(
                "iteration cap must be positive",
            ));
        }
        Ok(())
    }
}

/// What a single [`AdaptiveSampler::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A trial ran on `arm` and its outcome was recorded.
    Observed {
        /// Arm that was tried.
        arm: usize,
        /// Trial outcome.
        success: bool,
    },
    /// The oracle failed on `arm`, which is now unselectable.
    ArmDisabled {
        /// Arm that was disabled.
        arm: usize,
    },
    /// No selectable arm is left.
    Exhausted,
}

/// A bandit algorithm over a fixed set of arms.
pub trait AdaptiveSampler {
    /// Which algorithm this is.
    fn algorithm(&self) -> Algorithm;

    /// Current beliefs.
    fn model(&self) -> &BetaBernoulliModel;

    /// `true` for arms that may still be selected.
    fn selectable(&self) -> &[bool];

    /// Clears beliefs and re-enables every arm. The generator is not reseeded.
    fn reset(&mut self);

    /// Runs one select/trial/update iteration.
    ///
    /// # Errors
    ///
    /// Returns an error only if the oracle reports more arms than the model.
    fn step(&mut self, oracle: &mut dyn Oracle) -> BanditResult<StepOutcome>;

    /// Selectable arm with the highest posterior mean; ties go to the lowest
    /// index.
    fn best_arm(&self) -> Option<usize> {
        argmax(&self.model().posterior_means(), self.selectable())
    }

    /// Runs the sampler from fresh beliefs until `termination` fires, the
    /// iteration cap is reached or every arm is disabled.
    ///
    /// A snapshot is taken every `snapshot_rate` iterations starting at
    /// iteration 0, and once more at the end if the last iteration is off
    /// the cadence.
    ///
    /// # Errors
    ///
    /// Returns an error if `params` is invalid or the oracle does not cover
    /// the sampler's arms.
    fn solve(
        &mut self,
        oracle: &mut dyn Oracle,
        termination: &dyn TerminationCondition,
        params: &SolveParams,
    ) -> BanditResult<SamplingResult> {
        params.validate()?;
        let arms = self.model().num_arms();
        if oracle.num_arms() != arms {
            return Err(BanditError::LengthMismatch {
                expected: arms,
                found: oracle.num_arms(),
            });
        }

        self.reset();
        let algorithm = self.algorithm();
        info!(%algorithm, arms, "Starting sampler run");
        let start = Instant::now();

        let mut snapshots = Vec::new();
        let mut iteration = 0;
        let stop_reason = loop {
            if iteration % params.snapshot_rate == 0 {
                let snapshot = take_snapshot(self, iteration);
                debug!(
                    %algorithm,
                    iteration,
                    best_arm = ?snapshot.best_arm,
                    best_mean = snapshot.best_mean,
                    "Snapshot"
                );
                snapshots.push(snapshot);
            }

            let state = TerminationState {
                iteration,
                elapsed: start.elapsed(),
                model: self.model(),
                leader: self.best_arm(),
            };
            if termination.should_terminate(&state) {
                break StopReason::Condition;
            }
            if iteration >= params.iteration_cap {
                break StopReason::IterationCap;
            }

            match self.step(oracle)? {
                StepOutcome::Exhausted => break StopReason::NoSelectableArms,
                StepOutcome::Observed { .. } | StepOutcome::ArmDisabled { .. } => iteration += 1,
            }
        };

        if snapshots.last().map(|s| s.iteration) != Some(iteration) {
            snapshots.push(take_snapshot(self, iteration));
        }

        let model = self.model();
        let selectable = self.selectable();
        let disabled_arms: Vec<usize> = selectable
            .iter()
            .enumerate()
            .filter_map(|(i, &ok)| (!ok).then_some(i))
            .collect();
        let ranked_arms: Vec<usize> = model
            .ranked_arms()
            .into_iter()
            .filter(|&arm| selectable.get(arm).copied().unwrap_or(false))
            .collect();
        let result = SamplingResult {
            algorithm,
            snapshots,
            iterations: iteration,
            final_means: model.posterior_means(),
            ranked_arms,
            disabled_arms,
            stop_reason,
        };

        info!(
            %algorithm,
            iterations = iteration,
            ?stop_reason,
            disabled = result.disabled_arms.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Sampler run finished"
        );
        Ok(result)
    }
}

fn take_snapshot<S: AdaptiveSampler + ?Sized>(sampler: &S, iteration: usize) -> Snapshot {
    let best_arm = sampler.best_arm();
    Snapshot {
        iteration,
        best_arm,
        best_mean: best_arm.map_or(0.0, |arm| sampler.model().posterior_mean(arm)),
    }
}

/// State every sampler carries: beliefs, the selection objective, the owned
/// generator and the per-arm selectable flags.
#[derive(Debug, Clone)]
pub(crate) struct SamplerCore<R> {
    pub(crate) model: BetaBernoulliModel,
    pub(crate) objective: Objective,
    pub(crate) rng: R,
    pub(crate) selectable: Vec<bool>,
}

impl<R: Rng> SamplerCore<R> {
    pub(crate) fn new(model: BetaBernoulliModel, rng: R) -> BanditResult<Self> {
        if model.num_arms() == 0 {
            return Err(BanditError::NoArms);
        }
        let selectable = vec![true; model.num_arms()];
        Ok(Self {
            model,
            objective: Objective::default(),
            rng,
            selectable,
        })
    }

    pub(crate) fn reset(&mut self) {
        self.model.reset();
        self.selectable.fill(true);
    }

    /// Arm with the highest posterior draw among selectable arms.
    pub(crate) fn thompson_arm(&mut self) -> Option<usize> {
        let draws: Vec<f64> = (0..self.model.num_arms())
            .map(|arm| {
                if self.selectable[arm] {
                    self.model.sample(arm, &mut self.rng)
                } else {
                    f64::NAN
                }
            })
            .collect();
        self.objective.select(&draws, &self.selectable, &mut self.rng)
    }

    /// Runs one trial, disabling the arm if the oracle fails on it.
    ///
    /// Returns the outcome, or `None` if the arm was disabled.
    pub(crate) fn trial(
        &mut self,
        oracle: &mut dyn Oracle,
        arm: usize,
        algorithm: Algorithm,
    ) -> Option<bool> {
        match oracle.trial(arm, &mut self.rng) {
            Ok(success) => Some(success),
            Err(err) => {
                warn!(%algorithm, arm, error = %err, "Oracle failed, arm disabled for this run");
                self.selectable[arm] = false;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::termination::{MaxIterTerminationCondition, OrTerminationCondition};
    use rand::RngCore;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Always succeeds, except on the arms listed as broken.
    struct FlakyOracle {
        arms: usize,
        broken: Vec<usize>,
    }

    impl Oracle for FlakyOracle {
        fn num_arms(&self) -> usize {
            self.arms
        }

        fn trial(&mut self, arm: usize, _rng: &mut dyn RngCore) -> Result<bool, OracleError> {
            if self.broken.contains(&arm) {
                Err(OracleError::trial_failed(arm, "simulation diverged"))
            } else {
                Ok(true)
            }
        }
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn test_params_validation() {
        assert!(SolveParams::default().validate().is_ok());
        assert!(SolveParams::default().with_snapshot_rate(0).validate().is_err());
        assert!(SolveParams::default().with_iteration_cap(0).validate().is_err());
    }

    #[test]
    fn test_or_max_iter_stops_exactly() {
        let mut oracle = FlakyOracle {
            arms: 3,
            broken: vec![],
        };
        let mut sampler = UniformAllocation::new(3, rng()).unwrap();
        let stop = OrTerminationCondition::default().with(MaxIterTerminationCondition::new(5));
        let params = SolveParams::default().with_iteration_cap(10);

        let result = sampler.solve(&mut oracle, &stop, &params).unwrap();
        assert_eq!(result.iterations, 5);
        assert_eq!(result.stop_reason, StopReason::Condition);
        assert_eq!(result.iters(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_iteration_cap() {
        let mut oracle = FlakyOracle {
            arms: 2,
            broken: vec![],
        };
        let mut sampler = ThompsonSampling::new(2, rng()).unwrap();
        let stop = OrTerminationCondition::default();
        let params = SolveParams::default().with_iteration_cap(7).with_snapshot_rate(3);

        let result = sampler.solve(&mut oracle, &stop, &params).unwrap();
        assert_eq!(result.iterations, 7);
        assert_eq!(result.stop_reason, StopReason::IterationCap);
        assert_eq!(result.iters(), vec![0, 3, 6, 7]);
    }

    #[test]
    fn test_failing_arm_disabled_not_fatal() {
        let mut oracle = FlakyOracle {
            arms: 4,
            broken: vec![1],
        };
        let mut sampler = UniformAllocation::new(4, rng()).unwrap();
        let stop = MaxIterTerminationCondition::new(20);

        let result = sampler
            .solve(&mut oracle, &stop, &SolveParams::default())
            .unwrap();
        assert_eq!(result.iterations, 20);
        assert_eq!(result.disabled_arms, vec![1]);
        assert_eq!(result.ranked_arms.len(), 3);
        assert!(!result.ranked_arms.contains(&1));
        assert_eq!(result.final_means.len(), 4);
        assert_eq!(sampler.model().observations(1), 0.0);
        assert!(result.best_candidates(4).iter().all(|&(arm, _)| arm != 1));
        assert!(result.snapshots.iter().all(|s| s.best_arm != Some(1)));
    }

    #[test]
    fn test_all_arms_broken_exhausts() {
        let mut oracle = FlakyOracle {
            arms: 2,
            broken: vec![0, 1],
        };
        let mut sampler = ThompsonSampling::new(2, rng()).unwrap();
        let stop = MaxIterTerminationCondition::new(50);

        let result = sampler
            .solve(&mut oracle, &stop, &SolveParams::default().with_snapshot_rate(10))
            .unwrap();
        assert_eq!(result.stop_reason, StopReason::NoSelectableArms);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.disabled_arms, vec![0, 1]);
        assert!(result.ranked_arms.is_empty());
        assert_eq!(result.final_means, vec![0.5, 0.5]);
        assert_eq!(result.snapshots.last().unwrap().best_arm, None);
    }

    #[test]
    fn test_oracle_size_mismatch() {
        let mut oracle = FlakyOracle {
            arms: 5,
            broken: vec![],
        };
        let mut sampler = UniformAllocation::new(4, rng()).unwrap();
        let stop = MaxIterTerminationCondition::new(1);
        assert!(matches!(
            sampler.solve(&mut oracle, &stop, &SolveParams::default()),
            Err(BanditError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_solve_resets_between_runs() {
        let mut oracle = FlakyOracle {
            arms: 2,
            broken: vec![0],
        };
        let mut sampler = UniformAllocation::new(2, rng()).unwrap();
        let stop = MaxIterTerminationCondition::new(4);

        let first = sampler
            .solve(&mut oracle, &stop, &SolveParams::default())
            .unwrap();
        oracle.broken.clear();
        let second = sampler
            .solve(&mut oracle, &stop, &SolveParams::default())
            .unwrap();
        assert_eq!(first.disabled_arms, vec![0]);
        assert!(second.disabled_arms.is_empty());
        assert_eq!(sampler.model().observations(0), 2.0);
        assert_eq!(sampler.model().observations(1), 2.0);
    }
}
