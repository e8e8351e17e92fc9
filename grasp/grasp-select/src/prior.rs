//! Beta priors transferred from grasps on similar objects.
//!
//! Grasps that held (or slipped) on a similar object are evidence about a
//! new object's grasps. Each neighbor grasp adds its recorded successes and
//! failures to a candidate's prior, weighted by
//! `object_kernel(object, neighbor) * grasp_kernel(candidate, neighbor_grasp)`.
//! Neighbor grasps are found through a feature index within the grasp
//! kernel's error radius, so the cost per candidate stays local.

use grasp_bandit::{BanditError, BanditResult, BetaBernoulliModel, DEFAULT_PRIOR};
use grasp_kernel::{Kernel, NeighborSearch, SquaredExponentialKernel, build_feature_index};
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::BanditConfig;
use crate::dataset::{GraspableObject, ObjectSequence, ObjectSource};
use crate::error::SelectResult;

/// Per-candidate Beta priors for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorEstimate {
    /// First Beta parameter per candidate.
    pub alpha: Vec<f64>,
    /// Second Beta parameter per candidate.
    pub beta: Vec<f64>,
    /// Neighbor objects that were consulted, nearest first.
    pub neighbor_keys: Vec<String>,
    /// Object-kernel value of each consulted neighbor (zero below tolerance).
    pub neighbor_kernels: Vec<f64>,
    /// Number of neighbor grasps that contributed to each candidate.
    pub neighbor_counts: Vec<usize>,
}

impl PriorEstimate {
    /// Uniform `Beta(1, 1)` priors for `candidates` candidates.
    #[must_use]
    pub fn uniform(candidates: usize) -> Self {
        Self {
            alpha: vec![DEFAULT_PRIOR; candidates],
            beta: vec![DEFAULT_PRIOR; candidates],
            neighbor_keys: Vec::new(),
            neighbor_kernels: Vec::new(),
            neighbor_counts: vec![0; candidates],
        }
    }

    /// Number of candidates covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alpha.len()
    }

    /// Returns `true` if no candidates are covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alpha.is_empty()
    }

    /// Builds a belief model over the candidates at `positions`.
    ///
    /// # Errors
    ///
    /// Returns an error if a position is out of range.
    pub fn model_for(&self, positions: &[usize]) -> BanditResult<BetaBernoulliModel> {
        let pick = |values: &[f64]| -> BanditResult<Vec<f64>> {
            positions
                .iter()
                .map(|&p| {
                    values.get(p).copied().ok_or(BanditError::ArmOutOfRange {
                        arm: p,
                        arms: values.len(),
                    })
                })
                .collect()
        };
        BetaBernoulliModel::with_priors(pick(&self.alpha)?, pick(&self.beta)?)
    }
}

/// A grasp on a neighbor object, weighted by that object's similarity.
struct NeighborGrasp {
    features: DVector<f64>,
    successes: f64,
    failures: f64,
    object_kernel: f64,
}

/// Computes candidate priors from the grasps of similar objects.
pub struct PriorComputation {
    grasp_kernel: SquaredExponentialKernel,
    object_kernel: SquaredExponentialKernel,
    grasp_tolerance: f64,
    object_tolerance: f64,
    num_neighbors: usize,
    object_keys: Vec<String>,
    object_index: Option<Box<dyn NeighborSearch>>,
}

impl std::fmt::Debug for PriorComputation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorComputation")
            .field("objects", &self.object_keys.len())
            .field("num_neighbors", &self.num_neighbors)
            .finish_non_exhaustive()
    }
}

impl PriorComputation {
    /// Indexes the descriptors of `objects` (key, descriptor).
    ///
    /// Descriptors that are non-finite or whose dimension differs from the
    /// first one are left out with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &BanditConfig, objects: Vec<(String, DVector<f64>)>) -> SelectResult<Self> {
        config.validate()?;
        let grasp_kernel = SquaredExponentialKernel::new(config.kernel_sigma, config.kernel_l)?;
        let object_kernel =
            SquaredExponentialKernel::new(1.0, 1.0 / config.prior_neighbor_weight)?;

        let dim = objects.first().map(|(_, f)| f.len());
        let mut object_keys = Vec::with_capacity(objects.len());
        let mut descriptors = Vec::with_capacity(objects.len());
        for (key, features) in objects {
            if Some(features.len()) != dim || features.iter().any(|x| !x.is_finite()) {
                warn!(key = %key, "Object descriptor unusable, left out of prior search");
                continue;
            }
            object_keys.push(key);
            descriptors.push(features);
        }
        let object_index = if descriptors.is_empty() {
            None
        } else {
            Some(build_feature_index(&descriptors, None)?)
        };

        info!(objects = object_keys.len(), "Indexed object descriptors for priors");
        Ok(Self {
            grasp_kernel,
            object_kernel,
            grasp_tolerance: config.kernel_tolerance,
            object_tolerance: config.prior_kernel_tolerance,
            num_neighbors: config.prior_num_neighbors,
            object_keys,
            object_index,
        })
    }

    /// Indexes every readable object of `source` that has a descriptor.
    ///
    /// # Errors
    ///
    /// See [`PriorComputation::new`].
    pub fn from_source<S: ObjectSource + ?Sized>(
        source: &S,
        config: &BanditConfig,
    ) -> SelectResult<Self> {
        let objects = ObjectSequence::new(source, 0, None)
            .filter_map(|o| Some((o.key, o.features?)))
            .collect();
        Self::new(config, objects)
    }

    /// The `prior_num_neighbors` objects most similar to `features`, other
    /// than `exclude`, with their object-kernel values.
    ///
    /// # Errors
    ///
    /// Returns an error if `features` does not match the indexed dimension.
    pub fn nearest_objects(
        &self,
        features: &DVector<f64>,
        exclude: &str,
    ) -> SelectResult<Vec<(String, f64)>> {
        let Some(index) = &self.object_index else {
            return Ok(Vec::new());
        };
        let neighbors = index.k_nearest(features, self.num_neighbors.saturating_add(1))?;
        Ok(neighbors
            .into_iter()
            .filter_map(|n| {
                let key = self.object_keys.get(n.index)?;
                let stored = index.feature(n.index)?;
                (key != exclude)
                    .then(|| (key.clone(), self.object_kernel.similarity(features, stored)))
            })
            .take(self.num_neighbors)
            .collect())
    }

    /// Priors for every candidate of `object`, in candidate order.
    ///
    /// Falls back to uniform priors, with a warning, when the object has no
    /// descriptor or no usable neighbor grasps.
    ///
    /// # Errors
    ///
    /// Returns an error only for an invalid kernel tolerance.
    pub fn compute_priors<S: ObjectSource + ?Sized>(
        &self,
        object: &GraspableObject,
        source: &S,
    ) -> SelectResult<PriorEstimate> {
        let n = object.candidates.len();
        let Some(descriptor) = &object.features else {
            warn!(key = %object.key, "Object has no descriptor, using uniform priors");
            return Ok(PriorEstimate::uniform(n));
        };
        let neighbors = match self.nearest_objects(descriptor, &object.key) {
            Ok(neighbors) => neighbors,
            Err(err) => {
                warn!(key = %object.key, error = %err, "Neighbor search failed, using uniform priors");
                return Ok(PriorEstimate::uniform(n));
            }
        };

        let grasp_dim = object
            .candidates
            .iter()
            .find_map(|c| c.usable_features().map(DVector::len));
        let mut estimate = PriorEstimate::uniform(n);
        let mut pool = Vec::new();
        for (key, kernel) in neighbors {
            estimate.neighbor_keys.push(key.clone());
            if kernel < self.object_tolerance || kernel <= 0.0 {
                estimate.neighbor_kernels.push(0.0);
                continue;
            }
            estimate.neighbor_kernels.push(kernel);
            match source.load(&key) {
                Ok(neighbor) => pool.extend(neighbor.candidates.iter().filter_map(|c| {
                    let features = c.usable_features()?;
                    (Some(features.len()) == grasp_dim).then(|| NeighborGrasp {
                        features: features.clone(),
                        successes: c.successes,
                        failures: c.failures,
                        object_kernel: kernel,
                    })
                })),
                Err(err) => warn!(key = %key, error = %err, "Skipping unreadable neighbor"),
            }
        }
        if pool.is_empty() {
            warn!(key = %object.key, "No neighbor grasps, using uniform priors");
            return Ok(estimate);
        }

        let pool_features: Vec<DVector<f64>> = pool.iter().map(|g| g.features.clone()).collect();
        let index = match build_feature_index(&pool_features, None) {
            Ok(index) => index,
            Err(err) => {
                warn!(key = %object.key, error = %err, "Cannot index neighbor grasps, using uniform priors");
                return Ok(estimate);
            }
        };
        let radius = self.grasp_kernel.error_radius(self.grasp_tolerance)?;

        let priors: Vec<(f64, f64, usize)> = object
            .candidates
            .par_iter()
            .map(|candidate| {
                let mut alpha = DEFAULT_PRIOR;
                let mut beta = DEFAULT_PRIOR;
                let Some(features) = candidate.usable_features() else {
                    return (alpha, beta, 0);
                };
                let Ok(hits) = index.within_distance(features, radius) else {
                    return (alpha, beta, 0);
                };
                for hit in &hits {
                    let grasp = &pool[hit.index];
                    let weight =
                        grasp.object_kernel * self.grasp_kernel.similarity(features, &grasp.features);
                    alpha += weight * grasp.successes;
                    beta += weight * grasp.failures;
                }
                (alpha, beta, hits.len())
            })
            .collect();

        for (i, (alpha, beta, count)) in priors.into_iter().enumerate() {
            estimate.alpha[i] = alpha;
            estimate.beta[i] = beta;
            estimate.neighbor_counts[i] = count;
        }
        info!(
            key = %object.key,
            neighbors = estimate.neighbor_keys.len(),
            neighbor_grasps = pool.len(),
            "Computed grasp priors"
        );
        Ok(estimate)
    }
}
