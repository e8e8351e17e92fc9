//! Beta-Bernoulli beliefs over each arm's probability of force closure.
//!
//! Every arm carries a Beta posterior. A trial outcome either updates the
//! tried arm alone, or is shared with correlated arms in proportion to their
//! kernel value, in which case the counts become fractional.

use grasp_kernel::KernelEntry;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use crate::error::{BanditError, BanditResult};

/// Prior pseudo-count used when none is given (Laplace smoothing).
pub const DEFAULT_PRIOR: f64 = 1.0;

/// Per-arm Beta posteriors over success probability.
///
/// The posterior of arm `i` is `Beta(alpha_i + s_i, beta_i + f_i)`, where
/// `s_i`/`f_i` are the observed (possibly kernel-weighted) successes and
/// failures and `alpha_i`/`beta_i` the prior pseudo-counts (1 by default).
/// Counts start at zero and never decrease.
///
/// # Example
///
/// ```
/// use grasp_bandit::BetaBernoulliModel;
///
/// let mut model = BetaBernoulliModel::new(3);
/// model.independent_update(1, true).unwrap();
/// model.independent_update(1, true).unwrap();
/// model.independent_update(1, false).unwrap();
///
/// // (2 + 1) / (3 + 2)
/// assert!((model.posterior_mean(1) - 0.6).abs() < 1e-12);
/// assert!((model.posterior_mean(0) - 0.5).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaBernoulliModel {
    successes: Vec<f64>,
    failures: Vec<f64>,
    alpha_prior: Vec<f64>,
    beta_prior: Vec<f64>,
    /// Kernel values below this contribute nothing to a correlated update.
    kernel_tolerance: f64,
}

impl BetaBernoulliModel {
    /// Creates a model over `arms` arms with uniform `Beta(1, 1)` priors.
    #[must_use]
    pub fn new(arms: usize) -> Self {
        Self {
            successes: vec![0.0; arms],
            failures: vec![0.0; arms],
            alpha_prior: vec![DEFAULT_PRIOR; arms],
            beta_prior: vec![DEFAULT_PRIOR; arms],
            kernel_tolerance: 0.0,
        }
    }

    /// Creates a model with per-arm prior pseudo-counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the prior vectors differ in length or contain a
    /// value that is not positive and finite.
    pub fn with_priors(alpha_prior: Vec<f64>, beta_prior: Vec<f64>) -> BanditResult<Self> {
        if alpha_prior.len() != beta_prior.len() {
            return Err(BanditError::LengthMismatch {
                expected: alpha_prior.len(),
                found: beta_prior.len(),
            });
        }
        if let Some(bad) = alpha_prior
            .iter()
            .chain(&beta_prior)
            .find(|p| !(p.is_finite() && **p > 0.0))
        {
            return Err(BanditError::invalid_parameter(format!(
                "prior pseudo-counts must be positive and finite, got {bad}"
            )));
        }
        let arms = alpha_prior.len();
        Ok(Self {
            successes: vec![0.0; arms],
            failures: vec![0.0; arms],
            alpha_prior,
            beta_prior,
            kernel_tolerance: 0.0,
        })
    }

    /// Sets the kernel tolerance used by correlated updates.
    ///
    /// # Errors
    ///
    /// Returns an error unless `0 <= tolerance <= 1`.
    pub fn with_kernel_tolerance(mut self, tolerance: f64) -> BanditResult<Self> {
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(BanditError::invalid_parameter(format!(
                "kernel tolerance must be in [0, 1], got {tolerance}"
            )));
        }
        self.kernel_tolerance = tolerance;
        Ok(self)
    }

    /// Number of arms.
    #[must_use]
    pub fn num_arms(&self) -> usize {
        self.successes.len()
    }

    /// Kernel tolerance for correlated updates.
    #[must_use]
    pub const fn kernel_tolerance(&self) -> f64 {
        self.kernel_tolerance
    }

    /// Observed (possibly fractional) successes per arm.
    #[must_use]
    pub fn successes(&self) -> &[f64] {
        &self.successes
    }

    /// Observed (possibly fractional) failures per arm.
    #[must_use]
    pub fn failures(&self) -> &[f64] {
        &self.failures
    }

    /// Clears all observations, keeping the priors.
    pub fn reset(&mut self) {
        self.successes.fill(0.0);
        self.failures.fill(0.0);
    }

    fn check_arm(&self, arm: usize) -> BanditResult<()> {
        if arm < self.num_arms() {
            Ok(())
        } else {
            Err(BanditError::ArmOutOfRange {
                arm,
                arms: self.num_arms(),
            })
        }
    }

    fn add_weighted(&mut self, arm: usize, success: bool, weight: f64) {
        if success {
            self.successes[arm] += weight;
        } else {
            self.failures[arm] += weight;
        }
    }

    fn counts_toward(&self, weight: f64) -> bool {
        weight.is_finite() && weight > 0.0 && weight >= self.kernel_tolerance
    }

    /// Records one trial outcome on `arm` only.
    ///
    /// # Errors
    ///
    /// Returns [`BanditError::ArmOutOfRange`] for an unknown arm.
    pub fn independent_update(&mut self, arm: usize, success: bool) -> BanditResult<()> {
        self.check_arm(arm)?;
        self.add_weighted(arm, success, 1.0);
        Ok(())
    }

    /// Shares one trial outcome on `arm` with every correlated arm.
    ///
    /// `kernel_row[j]` is the kernel value between `arm` and arm `j`. Arm `j`
    /// receives `kernel_row[j]` successes (or failures) when that value is at
    /// least the kernel tolerance, and nothing otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown arm or a row of the wrong length.
    pub fn correlated_update(
        &mut self,
        arm: usize,
        success: bool,
        kernel_row: &[f64],
    ) -> BanditResult<()> {
        self.check_arm(arm)?;
        if kernel_row.len() != self.num_arms() {
            return Err(BanditError::LengthMismatch {
                expected: self.num_arms(),
                found: kernel_row.len(),
            });
        }
        for (j, &weight) in kernel_row.iter().enumerate() {
            if self.counts_toward(weight) {
                self.add_weighted(j, success, weight);
            }
        }
        Ok(())
    }

    /// Sparse form of [`BetaBernoulliModel::correlated_update`].
    ///
    /// Arms missing from `entries` are treated as uncorrelated.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown arm, including any entry index.
    pub fn propagate(
        &mut self,
        arm: usize,
        success: bool,
        entries: &[KernelEntry],
    ) -> BanditResult<()> {
        self.check_arm(arm)?;
        for entry in entries {
            self.check_arm(entry.index)?;
        }
        for entry in entries {
            if self.counts_toward(entry.weight) {
                self.add_weighted(entry.index, success, entry.weight);
            }
        }
        Ok(())
    }

    /// First parameter of arm `arm`'s posterior.
    ///
    /// # Panics
    ///
    /// Panics if `arm` is out of range.
    #[must_use]
    pub fn posterior_alpha(&self, arm: usize) -> f64 {
        self.alpha_prior[arm] + self.successes[arm]
    }

    /// Second parameter of arm `arm`'s posterior.
    ///
    /// # Panics
    ///
    /// Panics if `arm` is out of range.
    #[must_use]
    pub fn posterior_beta(&self, arm: usize) -> f64 {
        self.beta_prior[arm] + self.failures[arm]
    }

    /// Posterior mean success probability of `arm`.
    ///
    /// # Panics
    ///
    /// Panics if `arm` is out of range.
    #[must_use]
    pub fn posterior_mean(&self, arm: usize) -> f64 {
        let a = self.posterior_alpha(arm);
        a / (a + self.posterior_beta(arm))
    }

    /// Posterior means of all arms.
    #[must_use]
    pub fn posterior_means(&self) -> Vec<f64> {
        (0..self.num_arms()).map(|i| self.posterior_mean(i)).collect()
    }

    /// Posterior variance of `arm`.
    ///
    /// # Panics
    ///
    /// Panics if `arm` is out of range.
    #[must_use]
    pub fn posterior_variance(&self, arm: usize) -> f64 {
        let a = self.posterior_alpha(arm);
        let b = self.posterior_beta(arm);
        let total = a + b;
        a * b / (total * total * (total + 1.0))
    }

    /// Half-width of a central credible interval holding at least
    /// `confidence` of the posterior mass of `arm`.
    ///
    /// Uses Chebyshev's bound, so it holds for any posterior shape.
    ///
    /// # Panics
    ///
    /// Panics if `arm` is out of range.
    #[must_use]
    pub fn credible_half_width(&self, arm: usize, confidence: f64) -> f64 {
        let confidence = confidence.clamp(0.0, 1.0 - f64::EPSILON);
        (self.posterior_variance(arm) / (1.0 - confidence)).sqrt()
    }

    /// Draws a success probability for `arm` from its posterior.
    ///
    /// # Panics
    ///
    /// Panics if `arm` is out of range.
    pub fn sample<R: Rng + ?Sized>(&self, arm: usize, rng: &mut R) -> f64 {
        let a = self.posterior_alpha(arm);
        let b = self.posterior_beta(arm);
        Beta::new(a, b).map_or_else(|_| self.posterior_mean(arm), |dist| dist.sample(rng))
    }

    /// Total observation weight recorded for `arm`.
    ///
    /// # Panics
    ///
    /// Panics if `arm` is out of range.
    #[must_use]
    pub fn observations(&self, arm: usize) -> f64 {
        self.successes[arm] + self.failures[arm]
    }

    /// Arms ordered by posterior mean, best first; ties keep index order.
    #[must_use]
    pub fn ranked_arms(&self) -> Vec<usize> {
        let means = self.posterior_means();
        let mut arms: Vec<usize> = (0..self.num_arms()).collect();
        arms.sort_by(|&a, &b| means[b].total_cmp(&means[a]).then_with(|| a.cmp(&b)));
        arms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_initial_state() {
        let model = BetaBernoulliModel::new(4);
        assert_eq!(model.num_arms(), 4);
        for arm in 0..4 {
            assert_eq!(model.successes()[arm], 0.0);
            assert_eq!(model.failures()[arm], 0.0);
            assert_relative_eq!(model.posterior_mean(arm), 0.5);
        }
    }

    #[test]
    fn test_independent_update_counts() {
        let mut model = BetaBernoulliModel::new(3);
        let outcomes = [(0, true), (0, false), (2, true), (0, true), (2, true)];
        for &(arm, success) in &outcomes {
            model.independent_update(arm, success).unwrap();
        }
        assert_eq!(model.observations(0), 3.0);
        assert_eq!(model.observations(1), 0.0);
        assert_eq!(model.observations(2), 2.0);
        assert_relative_eq!(model.posterior_mean(0), 3.0 / 5.0);
        assert_relative_eq!(model.posterior_mean(2), 3.0 / 4.0);
    }

    #[test]
    fn test_update_out_of_range() {
        let mut model = BetaBernoulliModel::new(2);
        assert!(matches!(
            model.independent_update(2, true),
            Err(BanditError::ArmOutOfRange { arm: 2, arms: 2 })
        ));
    }

    #[test]
    fn test_correlated_update_respects_tolerance() {
        let mut model = BetaBernoulliModel::new(6).with_kernel_tolerance(0.5).unwrap();
        let row = [1.0, 0.2, 0.9, 0.49, 0.0, 0.6];
        model.correlated_update(0, true, &row).unwrap();

        assert_eq!(model.successes(), &[1.0, 0.0, 0.9, 0.0, 0.0, 0.6]);
        assert!(model.failures().iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_correlated_failure_is_fractional() {
        let mut model = BetaBernoulliModel::new(2).with_kernel_tolerance(0.1).unwrap();
        model.correlated_update(1, false, &[0.25, 1.0]).unwrap();
        assert_eq!(model.failures(), &[0.25, 1.0]);
        assert_relative_eq!(model.posterior_mean(0), 1.0 / 2.25);
    }

    #[test]
    fn test_correlated_update_row_length() {
        let mut model = BetaBernoulliModel::new(3);
        assert!(matches!(
            model.correlated_update(0, true, &[1.0, 0.5]),
            Err(BanditError::LengthMismatch {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn test_propagate_sparse_row() {
        let mut model = BetaBernoulliModel::new(4).with_kernel_tolerance(0.3).unwrap();
        let entries = [
            KernelEntry {
                index: 1,
                weight: 1.0,
            },
            KernelEntry {
                index: 3,
                weight: 0.7,
            },
            KernelEntry {
                index: 2,
                weight: 0.1,
            },
        ];
        model.propagate(1, false, &entries).unwrap();
        assert_eq!(model.failures(), &[0.0, 1.0, 0.0, 0.7]);

        let bad = [KernelEntry {
            index: 9,
            weight: 1.0,
        }];
        assert!(model.propagate(1, true, &bad).is_err());
        assert_eq!(model.successes(), &[0.0; 4]);
    }

    #[test]
    fn test_non_finite_weights_ignored() {
        let mut model = BetaBernoulliModel::new(3);
        model.correlated_update(0, true, &[1.0, f64::NAN, -0.5]).unwrap();
        assert_eq!(model.successes(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_priors() {
        let model = BetaBernoulliModel::with_priors(vec![3.0, 1.0], vec![1.0, 4.0]).unwrap();
        assert_relative_eq!(model.posterior_mean(0), 0.75);
        assert_relative_eq!(model.posterior_mean(1), 0.2);

        assert!(BetaBernoulliModel::with_priors(vec![1.0], vec![1.0, 1.0]).is_err());
        assert!(BetaBernoulliModel::with_priors(vec![0.0], vec![1.0]).is_err());
        assert!(BetaBernoulliModel::with_priors(vec![f64::NAN], vec![1.0]).is_err());
    }

    #[test]
    fn test_reset_keeps_priors() {
        let mut model = BetaBernoulliModel::with_priors(vec![2.0], vec![1.0]).unwrap();
        model.independent_update(0, false).unwrap();
        model.reset();
        assert_eq!(model.observations(0), 0.0);
        assert_relative_eq!(model.posterior_mean(0), 2.0 / 3.0);
    }

    #[test]
    fn test_variance_and_half_width_shrink() {
        let mut model = BetaBernoulliModel::new(1);
        let before = model.credible_half_width(0, 0.9);
        for i in 0..50 {
            model.independent_update(0, i % 3 != 0).unwrap();
        }
        let after = model.credible_half_width(0, 0.9);
        assert!(after < before);
        assert_relative_eq!(model.posterior_variance(0) * 10.0, after * after, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_tracks_posterior() {
        let mut model = BetaBernoulliModel::new(1);
        for _ in 0..40 {
            model.independent_update(0, true).unwrap();
        }
        for _ in 0..10 {
            model.independent_update(0, false).unwrap();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let draws: Vec<f64> = (0..2000).map(|_| model.sample(0, &mut rng)).collect();
        assert!(draws.iter().all(|d| (0.0..=1.0).contains(d)));
        let mean = draws.iter().sum::<f64>() / 2000.0;
        assert_relative_eq!(mean, model.posterior_mean(0), epsilon = 0.02);
    }

    #[test]
    fn test_ranked_arms() {
        let mut model = BetaBernoulliModel::new(4);
        model.independent_update(2, true).unwrap();
        model.independent_update(1, false).unwrap();
        assert_eq!(model.ranked_arms(), vec![2, 0, 3, 1]);
    }

    #[test]
    fn test_tolerance_validation() {
        assert!(BetaBernoulliModel::new(1).with_kernel_tolerance(1.5).is_err());
        assert!(BetaBernoulliModel::new(1).with_kernel_tolerance(-0.1).is_err());
        assert!(BetaBernoulliModel::new(1).with_kernel_tolerance(f64::NAN).is_err());
    }
}
