//! Grasp quality metrics over contact wrenches.
//!
//! Metrics operate on the 6 x n grasp matrix whose columns are contact
//! wrenches (force on top, torque below). Computing the contacts and their
//! friction cones belongs to the simulator; this module only scores them.
//!
//! - [`QualityMetric::ForceClosure`] - 1 if the origin lies in the wrench hull
//! - [`QualityMetric::MinSingular`] - weakest wrench direction
//! - [`QualityMetric::WrenchVolume`] - volume of the wrench ellipsoid
//! - [`QualityMetric::GraspIsotropy`] - weakest over strongest direction

use nalgebra::{DMatrix, DVector, Matrix3xX};
use serde::{Deserialize, Serialize};

use crate::error::{SelectError, SelectResult};

/// Tikhonov term added to the Gram matrix of the min-norm problem.
const GRAM_REGULARIZATION: f64 = 1e-4;

/// Frank-Wolfe iteration limit.
const MAX_HULL_ITERATIONS: usize = 2000;

/// Duality-gap tolerance for the min-norm problem.
const HULL_GAP_TOLERANCE: f64 = 1e-12;

const WRENCH_DIM: usize = 6;

fn default_eps() -> f64 {
    1e-2
}

fn default_k() -> f64 {
    1.0
}

/// Contact wrenches of one grasp.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactWrenches {
    forces: Matrix3xX<f64>,
    torques: Matrix3xX<f64>,
    normals: Option<Matrix3xX<f64>>,
}

impl ContactWrenches {
    /// Pairs force and torque columns.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError::InvalidWrenches`] if the column counts differ.
    pub fn new(forces: Matrix3xX<f64>, torques: Matrix3xX<f64>) -> SelectResult<Self> {
        if forces.ncols() != torques.ncols() {
            return Err(SelectError::InvalidWrenches(format!(
                "{} forces but {} torques",
                forces.ncols(),
                torques.ncols()
            )));
        }
        Ok(Self {
            forces,
            torques,
            normals: None,
        })
    }

    /// Models soft fingers: each contact normal adds a pure torsional wrench.
    #[must_use]
    pub fn with_soft_fingers(mut self, normals: Matrix3xX<f64>) -> Self {
        self.normals = Some(normals);
        self
    }

    /// Number of force/torque pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forces.ncols()
    }

    /// Returns `true` if there are no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forces.ncols() == 0
    }

    /// The 6 x n grasp matrix.
    ///
    /// Soft-finger normals are appended as extra columns with zero force.
    #[must_use]
    pub fn grasp_matrix(&self) -> DMatrix<f64> {
        let pairs = self.forces.ncols();
        let extra = self.normals.as_ref().map_or(0, Matrix3xX::ncols);
        let mut g = DMatrix::zeros(WRENCH_DIM, pairs + extra);
        for i in 0..pairs {
            g.fixed_view_mut::<3, 1>(0, i).copy_from(&self.forces.column(i));
            g.fixed_view_mut::<3, 1>(3, i).copy_from(&self.torques.column(i));
        }
        if let Some(normals) = &self.normals {
            for (j, normal) in normals.column_iter().enumerate() {
                g.fixed_view_mut::<3, 1>(3, pairs + j).copy_from(&normal);
            }
        }
        g
    }
}

/// Closed set of grasp quality metrics.
///
/// Serialized with a `metric` tag, e.g. `{"metric": "force_closure", "eps": 0.01}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum QualityMetric {
    /// 1 if the (regularized) squared min-norm point of the wrench hull is
    /// below `eps`, else 0.
    ForceClosure {
        /// Threshold on the squared min-norm.
        #[serde(default = "default_eps")]
        eps: f64,
    },
    /// Sixth singular value of the grasp matrix.
    MinSingular,
    /// `k * sqrt(prod singular values)`.
    WrenchVolume {
        /// Scale factor.
        #[serde(default = "default_k")]
        k: f64,
    },
    /// Smallest over largest singular value.
    GraspIsotropy,
}

impl Default for QualityMetric {
    fn default() -> Self {
        Self::ForceClosure { eps: default_eps() }
    }
}

impl QualityMetric {
    /// Metric name as used in configuration files.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ForceClosure { .. } => "force_closure",
            Self::MinSingular => "min_singular",
            Self::WrenchVolume { .. } => "wrench_volume",
            Self::GraspIsotropy => "grasp_isotropy",
        }
    }

    /// Scores a grasp. A grasp without contacts scores negative infinity.
    #[must_use]
    pub fn evaluate(&self, wrenches: &ContactWrenches) -> f64 {
        if wrenches.is_empty() {
            return f64::NEG_INFINITY;
        }
        let g = wrenches.grasp_matrix();
        match *self {
            Self::ForceClosure { eps } => {
                if min_norm_in_hull(&g) < eps {
                    1.0
                } else {
                    0.0
                }
            }
            Self::MinSingular => smallest_singular(&g),
            Self::WrenchVolume { k } => {
                k * g.singular_values().iter().product::<f64>().sqrt()
            }
            Self::GraspIsotropy => {
                let largest = g.singular_values().iter().copied().fold(0.0, f64::max);
                let isotropy = smallest_singular(&g) / largest;
                if isotropy.is_finite() { isotropy } else { 0.0 }
            }
        }
    }
}

/// Smallest of the six singular values; rank-deficient below six columns.
fn smallest_singular(g: &DMatrix<f64>) -> f64 {
    if g.ncols() < WRENCH_DIM {
        return 0.0;
    }
    g.singular_values()
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min)
}

/// Regularized squared distance from the origin to the convex hull of the
/// columns of `g`.
///
/// Minimizes `a' (G'G + r I) a` over the probability simplex with
/// Frank-Wolfe and exact line search.
#[must_use]
pub fn min_norm_in_hull(g: &DMatrix<f64>) -> f64 {
    let n = g.ncols();
    if n == 0 {
        return f64::INFINITY;
    }
    let mut q = g.transpose() * g;
    for i in 0..n {
        q[(i, i)] += GRAM_REGULARIZATION;
    }

    let mut a = DVector::from_element(n, 1.0 / n as f64);
    for _ in 0..MAX_HULL_ITERATIONS {
        let qa = &q * &a;
        let Some((vertex, _)) = qa
            .iter()
            .enumerate()
            .min_by(|(_, x), (_, y)| x.total_cmp(y))
        else {
            break;
        };

        // Gap of the linearization: a'Qa - (Qa)_vertex.
        let objective = a.dot(&qa);
        let gap = objective - qa[vertex];
        if gap <= HULL_GAP_TOLERANCE {
            break;
        }

        // f(a + t d) with d = e_vertex - a.
        let curvature = q[(vertex, vertex)] - 2.0 * qa[vertex] + objective;
        let step = if curvature > 0.0 {
            (gap / curvature).min(1.0)
        } else {
            1.0
        };
        a *= 1.0 - step;
        a[vertex] += step;
    }
    a.dot(&(&q * &a))
}
