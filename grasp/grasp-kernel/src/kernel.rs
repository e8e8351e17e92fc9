//! Squared-exponential similarity kernels over grasp feature vectors.
//!
//! A kernel scores how alike two grasps are. An observation on one grasp is
//! shared with every grasp whose similarity clears a tolerance, so the kernel
//! also exposes the distance beyond which that can no longer happen
//! ([`Kernel::error_radius`]).

use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;
use tracing::warn;

use crate::error::{KernelError, KernelResult};

/// Maps a feature vector to the feature vector of the same grasp with its
/// jaws labeled the other way round.
pub type FeatureMap = Arc<dyn Fn(&DVector<f64>) -> DVector<f64> + Send + Sync>;

/// A positive-semidefinite similarity between grasp feature vectors.
pub trait Kernel: Send + Sync {
    /// Evaluates the similarity between `a` and `b`.
    ///
    /// # Errors
    ///
    /// Returns an error if either vector is empty, the dimensions differ, or
    /// the distance between the vectors is not finite.
    fn evaluate(&self, a: &DVector<f64>, b: &DVector<f64>) -> KernelResult<f64>;

    /// Distance beyond which the similarity drops below `tolerance`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidParameter`] if `tolerance` is not a
    /// positive finite number.
    fn error_radius(&self, tolerance: f64) -> KernelResult<f64>;

    /// Error-tolerant form of [`Kernel::evaluate`].
    ///
    /// Mismatched or non-finite inputs mean "no correlation": the failure is
    /// logged and `0.0` is returned.
    fn similarity(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        match self.evaluate(a, b) {
            Ok(value) if value.is_finite() => value,
            Ok(value) => {
                warn!(value, "Kernel produced a non-finite similarity, using 0");
                0.0
            }
            Err(err) => {
                warn!(error = %err, "Kernel evaluation failed, using 0");
                0.0
            }
        }
    }
}

/// Squared Euclidean distance between two feature vectors.
///
/// # Errors
///
/// Returns an error if either vector is empty, the dimensions differ, or the
/// result is not finite.
pub fn squared_distance(a: &DVector<f64>, b: &DVector<f64>) -> KernelResult<f64> {
    if a.is_empty() || b.is_empty() {
        return Err(KernelError::EmptyFeatureVector);
    }
    if a.len() != b.len() {
        return Err(KernelError::dimension_mismatch(a.len(), b.len()));
    }
    let dist_sq = (a - b).norm_squared();
    if dist_sq.is_finite() {
        Ok(dist_sq)
    } else {
        Err(KernelError::NonFinite("feature distance"))
    }
}

/// Exchanges the two halves of a feature vector.
///
/// Grasp features are laid out as `[jaw 1 | shared | jaw 2]`, so relabeling
/// the jaws swaps the leading and trailing halves. For odd lengths the middle
/// component stays in place. The map is an isometric involution.
///
/// # Example
///
/// ```
/// use grasp_kernel::swap_halves;
/// use nalgebra::DVector;
///
/// let v = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
/// assert_eq!(swap_halves(&v).as_slice(), &[4.0, 5.0, 3.0, 1.0, 2.0]);
/// ```
#[must_use]
pub fn swap_halves(features: &DVector<f64>) -> DVector<f64> {
    let n = features.len();
    let half = n / 2;
    let mut swapped = features.clone();
    for i in 0..half {
        swapped[i] = features[n - half + i];
        swapped[n - half + i] = features[i];
    }
    swapped
}

/// Squared-exponential kernel `sigma * exp(-||a - b||^2 / l)`.
///
/// # Example
///
/// ```
/// use grasp_kernel::{Kernel, SquaredExponentialKernel};
/// use nalgebra::DVector;
///
/// let kernel = SquaredExponentialKernel::new(1.0, 2.0).unwrap();
/// let a = DVector::from_vec(vec![0.0, 0.0]);
/// let b = DVector::from_vec(vec![1.0, 1.0]);
///
/// assert_eq!(kernel.evaluate(&a, &a).unwrap(), 1.0);
/// assert!((kernel.evaluate(&a, &b).unwrap() - (-1.0f64).exp()).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquaredExponentialKernel {
    sigma: f64,
    length_scale: f64,
}

impl SquaredExponentialKernel {
    /// Creates a kernel with amplitude `sigma` and length scale `l`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidParameter`] unless `0 < sigma <= 1` and
    /// `l` is positive and finite.
    pub fn new(sigma: f64, length_scale: f64) -> KernelResult<Self> {
        if !(sigma > 0.0 && sigma <= 1.0) {
            return Err(KernelError::invalid_parameter(format!(
                "kernel sigma must be in (0, 1], got {sigma}"
            )));
        }
        if !(length_scale > 0.0 && length_scale.is_finite()) {
            return Err(KernelError::invalid_parameter(format!(
                "kernel length scale must be positive and finite, got {length_scale}"
            )));
        }
        Ok(Self {
            sigma,
            length_scale,
        })
    }

    /// Returns the kernel amplitude.
    #[must_use]
    pub const fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Returns the kernel length scale.
    #[must_use]
    pub const fn length_scale(&self) -> f64 {
        self.length_scale
    }

    fn from_squared_distance(&self, dist_sq: f64) -> f64 {
        self.sigma * (-dist_sq / self.length_scale).exp()
    }
}

impl Kernel for SquaredExponentialKernel {
    fn evaluate(&self, a: &DVector<f64>, b: &DVector<f64>) -> KernelResult<f64> {
        squared_distance(a, b).map(|d| self.from_squared_distance(d))
    }

    fn error_radius(&self, tolerance: f64) -> KernelResult<f64> {
        if !(tolerance > 0.0 && tolerance.is_finite()) {
            return Err(KernelError::invalid_parameter(format!(
                "kernel tolerance must be positive and finite, got {tolerance}"
            )));
        }
        if tolerance >= self.sigma {
            return Ok(0.0);
        }
        Ok((self.length_scale * (self.sigma / tolerance).ln()).sqrt())
    }
}

/// Squared-exponential kernel that ignores the jaw labeling of a grasp.
///
/// Evaluates to the largest base similarity over the orderings of the two
/// feature vectors, so a grasp and its relabeled twin are fully similar.
///
/// # Example
///
/// ```
/// use grasp_kernel::{Kernel, SymmetricSquaredExponentialKernel};
/// use nalgebra::DVector;
///
/// let kernel = SymmetricSquaredExponentialKernel::new(1.0, 1.0).unwrap();
/// let a = DVector::from_vec(vec![0.0, 5.0]);
/// let b = DVector::from_vec(vec![5.0, 0.0]);
///
/// assert_eq!(kernel.evaluate(&a, &b).unwrap(), 1.0);
/// ```
#[derive(Clone)]
pub struct SymmetricSquaredExponentialKernel {
    base: SquaredExponentialKernel,
    alternate: FeatureMap,
}

impl SymmetricSquaredExponentialKernel {
    /// Creates a symmetric kernel that relabels grasps with [`swap_halves`].
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as
    /// [`SquaredExponentialKernel::new`].
    pub fn new(sigma: f64, length_scale: f64) -> KernelResult<Self> {
        Ok(Self {
            base: SquaredExponentialKernel::new(sigma, length_scale)?,
            alternate: Arc::new(swap_halves),
        })
    }

    /// Replaces the relabeling map.
    ///
    /// The map must be an isometric involution for the kernel to stay
    /// symmetric.
    #[must_use]
    pub fn with_alternate(mut self, alternate: FeatureMap) -> Self {
        self.alternate = alternate;
        self
    }

    /// Returns the underlying non-symmetric kernel.
    #[must_use]
    pub const fn base(&self) -> &SquaredExponentialKernel {
        &self.base
    }

    /// Applies the relabeling map to a feature vector.
    #[must_use]
    pub fn alternate(&self, features: &DVector<f64>) -> DVector<f64> {
        (self.alternate)(features)
    }
}

impl fmt::Debug for SymmetricSquaredExponentialKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricSquaredExponentialKernel")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl Kernel for SymmetricSquaredExponentialKernel {
    fn evaluate(&self, a: &DVector<f64>, b: &DVector<f64>) -> KernelResult<f64> {
        let direct = self.base.evaluate(a, b)?;
        // Relabel each side in turn so the result does not depend on argument order.
        let b_swapped = self.base.evaluate(a, &self.alternate(b))?;
        let a_swapped = self.base.evaluate(&self.alternate(a), b)?;
        Ok(direct.max(b_swapped).max(a_swapped))
    }

    fn error_radius(&self, tolerance: f64) -> KernelResult<f64> {
        self.base.error_radius(tolerance)
    }
}
