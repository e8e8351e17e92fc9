//! Experiment configuration.

use grasp_bandit::{
    ConfidenceTerminationCondition, MaxIterTerminationCondition, OrTerminationCondition,
    SolveParams,
};
use serde::{Deserialize, Serialize};

use crate::error::{SelectError, SelectResult};

fn default_prior_neighbor_weight() -> f64 {
    1.0
}

fn default_prior_num_neighbors() -> usize {
    5
}

fn default_prior_kernel_tolerance() -> f64 {
    0.1
}

/// Configuration for a correlated-bandit labeling experiment.
///
/// Field names match the keys of the JSON configuration file. Keys that
/// change the outcome of a run (iteration budget, snapshot cadence, kernel
/// hyperparameters) must be present; the rest have defaults.
///
/// # Example
///
/// ```
/// use grasp_select::BanditConfig;
///
/// let config = BanditConfig::from_json(r#"{
///     "bandit_max_iter": 500,
///     "bandit_confidence": 0.95,
///     "bandit_snapshot_rate": 10,
///     "kernel_sigma": 1.0,
///     "kernel_l": 0.5,
///     "kernel_tolerance": 0.1,
///     "grasp_symmetry": true,
///     "seed": 100
/// }"#).unwrap();
///
/// assert_eq!(config.bandit_max_iter, 500);
/// assert!(!config.confidence_termination);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditConfig {
    /// Iterations each sampler runs before the max-iteration condition fires.
    pub bandit_max_iter: usize,

    /// Fallback hard cap on iterations. Never lowers `bandit_max_iter`.
    #[serde(default)]
    pub bandit_brute_force_iter: Option<usize>,

    /// Confidence level for confidence-based termination.
    pub bandit_confidence: f64,

    /// Iterations between snapshots.
    pub bandit_snapshot_rate: usize,

    /// Kernel amplitude, in `(0, 1]`.
    pub kernel_sigma: f64,

    /// Kernel length scale.
    pub kernel_l: f64,

    /// Kernel value below which grasps are uncorrelated.
    pub kernel_tolerance: f64,

    /// Use symmetry-aware kernel and index.
    #[serde(default)]
    pub grasp_symmetry: bool,

    /// Root seed; drawn from entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Also stop when the leader's credible interval is narrow enough.
    #[serde(default)]
    pub confidence_termination: bool,

    /// First object (by index order) of the chunk to label.
    #[serde(default)]
    pub chunk_start: usize,

    /// One past the last object of the chunk; the end of the index if absent.
    #[serde(default)]
    pub chunk_end: Option<usize>,

    /// Inverse length scale of the object-similarity kernel used for priors.
    #[serde(default = "default_prior_neighbor_weight")]
    pub prior_neighbor_weight: f64,

    /// Number of neighbor objects consulted for priors.
    #[serde(default = "default_prior_num_neighbors")]
    pub prior_num_neighbors: usize,

    /// Object-kernel value below which a neighbor object contributes nothing.
    #[serde(default = "default_prior_kernel_tolerance")]
    pub prior_kernel_tolerance: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            bandit_max_iter: 1000,
            bandit_brute_force_iter: None,
            bandit_confidence: 0.95,
            bandit_snapshot_rate: 10,
            kernel_sigma: 1.0,
            kernel_l: 1.0,
            kernel_tolerance: 0.1,
            grasp_symmetry: false,
            seed: None,
            confidence_termination: false,
            chunk_start: 0,
            chunk_end: None,
            prior_neighbor_weight: default_prior_neighbor_weight(),
            prior_num_neighbors: default_prior_num_neighbors(),
            prior_kernel_tolerance: default_prior_kernel_tolerance(),
        }
    }
}

impl BanditConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, a required key is missing,
    /// or a value is out of range.
    pub fn from_json(json: &str) -> SelectResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> SelectResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Sets the iteration budget.
    #[must_use]
    pub const fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.bandit_max_iter = max_iter;
        self
    }

    /// Sets the snapshot cadence.
    #[must_use]
    pub const fn with_snapshot_rate(mut self, snapshot_rate: usize) -> Self {
        self.bandit_snapshot_rate = snapshot_rate;
        self
    }

    /// Sets the kernel hyperparameters and correlation tolerance.
    #[must_use]
    pub const fn with_kernel(mut self, sigma: f64, length_scale: f64, tolerance: f64) -> Self {
        self.kernel_sigma = sigma;
        self.kernel_l = length_scale;
        self.kernel_tolerance = tolerance;
        self
    }

    /// Enables symmetry-aware kernels.
    #[must_use]
    pub const fn with_symmetry(mut self, symmetric: bool) -> Self {
        self.grasp_symmetry = symmetric;
        self
    }

    /// Sets the root seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enables confidence-based termination at the given level.
    #[must_use]
    pub const fn with_confidence_termination(mut self, confidence: f64) -> Self {
        self.bandit_confidence = confidence;
        self.confidence_termination = true;
        self
    }

    /// Restricts labeling to objects `start..end` of the index.
    #[must_use]
    pub const fn with_chunk(mut self, start: usize, end: Option<usize>) -> Self {
        self.chunk_start = start;
        self.chunk_end = end;
        self
    }

    /// Checks every value for range errors.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError::InvalidConfig`] naming the first bad key.
    pub fn validate(&self) -> SelectResult<()> {
        if self.bandit_max_iter == 0 {
            return Err(SelectError::invalid_config("bandit_max_iter must be positive"));
        }
        if self.bandit_brute_force_iter == Some(0) {
            return Err(SelectError::invalid_config(
                "bandit_brute_force_iter must be positive",
            ));
        }
        if self.bandit_snapshot_rate == 0 {
            return Err(SelectError::invalid_config(
                "bandit_snapshot_rate must be positive",
            ));
        }
        if !(self.bandit_confidence > 0.0 && self.bandit_confidence < 1.0) {
            return Err(SelectError::invalid_config(format!(
                "bandit_confidence must be in (0, 1), got {}",
                self.bandit_confidence
            )));
        }
        if !(self.kernel_sigma > 0.0 && self.kernel_sigma <= 1.0) {
            return Err(SelectError::invalid_config(format!(
                "kernel_sigma must be in (0, 1], got {}",
                self.kernel_sigma
            )));
        }
        if !(self.kernel_l.is_finite() && self.kernel_l > 0.0) {
            return Err(SelectError::invalid_config(format!(
                "kernel_l must be positive, got {}",
                self.kernel_l
            )));
        }
        if !(self.kernel_tolerance > 0.0 && self.kernel_tolerance <= 1.0) {
            return Err(SelectError::invalid_config(format!(
                "kernel_tolerance must be in (0, 1], got {}",
                self.kernel_tolerance
            )));
        }
        if self.kernel_tolerance > self.kernel_sigma {
            return Err(SelectError::invalid_config(format!(
                "kernel_tolerance {} exceeds kernel_sigma {}, so no trial would count",
                self.kernel_tolerance, self.kernel_sigma
            )));
        }
        if self.chunk_end.is_some_and(|end| end < self.chunk_start) {
            return Err(SelectError::invalid_config("chunk_end precedes chunk_start"));
        }
        if !(self.prior_neighbor_weight.is_finite() && self.prior_neighbor_weight > 0.0) {
            return Err(SelectError::invalid_config(
                "prior_neighbor_weight must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.prior_kernel_tolerance) {
            return Err(SelectError::invalid_config(
                "prior_kernel_tolerance must be in [0, 1]",
            ));
        }
        Ok(())
    }

    /// Loop parameters for every sampler.
    #[must_use]
    pub fn solve_params(&self) -> SolveParams {
        let cap = self
            .bandit_brute_force_iter
            .map_or(self.bandit_max_iter, |b| b.max(self.bandit_max_iter));
        SolveParams::default()
            .with_snapshot_rate(self.bandit_snapshot_rate)
            .with_iteration_cap(cap)
    }

    /// The termination disjunction: max iterations, plus confidence if
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the confidence level is invalid.
    pub fn termination(&self) -> SelectResult<OrTerminationCondition> {
        let mut condition = OrTerminationCondition::default()
            .with(MaxIterTerminationCondition::new(self.bandit_max_iter));
        if self.confidence_termination {
            let confidence = ConfidenceTerminationCondition::new(self.bandit_confidence)?;
            condition = condition.with(confidence);
        }
        Ok(condition)
    }
}
