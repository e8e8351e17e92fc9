//! Dense kernel matrix over a candidate set.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::kernel::Kernel;

/// Symmetric matrix of pairwise kernel values between candidates.
///
/// Kept for reproducibility and offline analysis; the samplers themselves
/// only read the sparse rows in [`crate::CorrelationNeighborhoods`].
///
/// # Example
///
/// ```
/// use grasp_kernel::{KernelMatrix, SquaredExponentialKernel};
/// use nalgebra::DVector;
///
/// let kernel = SquaredExponentialKernel::new(1.0, 1.0).unwrap();
/// let features = vec![
///     DVector::from_vec(vec![0.0]),
///     DVector::from_vec(vec![1.0]),
/// ];
/// let matrix = KernelMatrix::compute(&kernel, &features);
///
/// assert_eq!(matrix.size(), 2);
/// assert_eq!(matrix.get(0, 0), 1.0);
/// assert_eq!(matrix.get(0, 1), matrix.get(1, 0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelMatrix {
    size: usize,
    /// Row-major values.
    values: Vec<f64>,
}

impl KernelMatrix {
    /// Evaluates the kernel between every pair of feature vectors.
    ///
    /// Pairs whose evaluation fails count as uncorrelated (`0.0`).
    #[must_use]
    pub fn compute<K: Kernel + ?Sized>(kernel: &K, features: &[DVector<f64>]) -> Self {
        let size = features.len();

        // Upper triangle, one row per task.
        let upper: Vec<Vec<f64>> = (0..size)
            .into_par_iter()
            .map(|i| {
                (i..size)
                    .map(|j| kernel.similarity(&features[i], &features[j]))
                    .collect()
            })
            .collect();

        let mut values = vec![0.0; size * size];
        for (i, row) in upper.iter().enumerate() {
            for (offset, &value) in row.iter().enumerate() {
                let j = i + offset;
                values[i * size + j] = value;
                values[j * size + i] = value;
            }
        }
        Self { size, values }
    }

    /// Number of candidates (rows and columns).
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns `true` if the matrix covers no candidates.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Kernel value between candidates `i` and `j`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        assert!(i < self.size && j < self.size, "kernel matrix index out of range");
        self.values[i * self.size + j]
    }

    /// Kernel values between candidate `i` and every candidate.
    #[must_use]
    pub fn row(&self, i: usize) -> Option<&[f64]> {
        (i < self.size).then(|| &self.values[i * self.size..(i + 1) * self.size])
    }

    /// Copies the matrix into an `nalgebra` matrix.
    #[must_use]
    pub fn to_dmatrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.size, self.size, &self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{SquaredExponentialKernel, SymmetricSquaredExponentialKernel};
    use approx::assert_relative_eq;

    fn features() -> Vec<DVector<f64>> {
        vec![
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![0.5, 0.0]),
            DVector::from_vec(vec![0.0, 3.0]),
            DVector::from_vec(vec![3.0, 0.0]),
        ]
    }

    #[test]
    fn test_matrix_symmetric_unit_diagonal() {
        let kernel = SquaredExponentialKernel::new(1.0, 1.0).unwrap();
        let matrix = KernelMatrix::compute(&kernel, &features());
        for i in 0..4 {
            assert_eq!(matrix.get(i, i), 1.0);
            for j in 0..4 {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
                assert!((0.0..=1.0).contains(&matrix.get(i, j)));
            }
        }
        assert_relative_eq!(matrix.get(0, 1), (-0.25f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_symmetric_kernel_matrix() {
        let kernel = SymmetricSquaredExponentialKernel::new(1.0, 1.0).unwrap();
        let matrix = KernelMatrix::compute(&kernel, &features());
        // [0, 3] and [3, 0] are the same grasp with swapped jaws.
        assert_eq!(matrix.get(2, 3), 1.0);
    }

    #[test]
    fn test_mismatched_features_are_uncorrelated() {
        let kernel = SquaredExponentialKernel::new(1.0, 1.0).unwrap();
        let features = vec![
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![0.0, 0.0, 0.0]),
        ];
        let matrix = KernelMatrix::compute(&kernel, &features);
        assert_eq!(matrix.get(0, 1), 0.0);
        assert_eq!(matrix.get(1, 1), 1.0);
    }

    #[test]
    fn test_rows_and_conversion() {
        let kernel = SquaredExponentialKernel::new(1.0, 1.0).unwrap();
        let matrix = KernelMatrix::compute(&kernel, &features());
        let row = matrix.row(1).unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(row[1], 1.0);
        assert!(matrix.row(4).is_none());

        let dense = matrix.to_dmatrix();
        assert_eq!(dense[(0, 1)], matrix.get(0, 1));
        assert_eq!(dense.transpose(), dense);
    }

    #[test]
    fn test_empty_matrix_and_serde() {
        let kernel = SquaredExponentialKernel::new(1.0, 1.0).unwrap();
        let empty = KernelMatrix::compute(&kernel, &[]);
        assert!(empty.is_empty());

        let matrix = KernelMatrix::compute(&kernel, &features());
        let json = serde_json::to_string(&matrix).unwrap();
        let restored: KernelMatrix = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, matrix);
    }
}
