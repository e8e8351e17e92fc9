//! Error types for kernel and neighbor-search operations.

use thiserror::Error;

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors that can occur when evaluating kernels or querying feature indices.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// Two feature vectors (or a vector and an index) disagree on dimension.
    #[error("feature dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch {
        /// Dimension required by the operation.
        expected: usize,
        /// Dimension that was supplied.
        found: usize,
    },

    /// A feature vector has no components.
    #[error("feature vector is empty")]
    EmptyFeatureVector,

    /// A computation produced or received NaN or infinity.
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl KernelError {
    /// Create an invalid parameter error.
    #[must_use]
    pub fn invalid_parameter(details: impl Into<String>) -> Self {
        Self::InvalidParameter(details.into())
    }

    /// Create a dimension mismatch error.
    #[must_use]
    pub const fn dimension_mismatch(expected: usize, found: usize) -> Self {
        Self::DimensionMismatch { expected, found }
    }
}
