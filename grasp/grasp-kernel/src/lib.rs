//! Similarity structure over grasp candidates.
//!
//! Correlated bandits share each trial outcome with grasps that look alike.
//! This crate provides the pieces that decide what "alike" means and keep
//! the lookups local:
//!
//! - **Kernels** - Squared-exponential similarity, with a jaw-symmetric variant
//! - **Feature indices** - KD-tree radius and k-nearest queries, with the dimension picked at runtime by [`build_feature_index`] and a scanning fallback for any other dimension
//! - **Kernel matrix** - Dense pairwise similarities for reproducibility
//! - **Correlation neighborhoods** - Sparse kernel rows cut off at a tolerance
//!
//! # Layer 0
//!
//! This is a Layer 0 crate with zero Bevy dependencies.
//!
//! # Quick Start
//!
//! ```
//! use grasp_kernel::{
//!     CorrelationNeighborhoods, FeatureIndex, Kernel, NeighborSearch, SquaredExponentialKernel,
//! };
//! use nalgebra::DVector;
//!
//! let features = vec![
//!     DVector::from_vec(vec![0.0, 0.0, 0.0]),
//!     DVector::from_vec(vec![0.1, 0.0, 0.1]),
//!     DVector::from_vec(vec![4.0, 4.0, 4.0]),
//! ];
//!
//! let kernel = SquaredExponentialKernel::new(1.0, 0.5).unwrap();
//! let index = FeatureIndex::<3>::with_features(&features).unwrap();
//!
//! // Only grasps within the error radius can clear the tolerance.
//! let radius = kernel.error_radius(0.1).unwrap();
//! let near = index.within_distance_indices(&features[0], radius).unwrap();
//! assert_eq!(near, vec![0, 1]);
//!
//! let hoods = CorrelationNeighborhoods::build(&index, &kernel, &features, 0.1).unwrap();
//! assert_eq!(hoods.row(2).len(), 1);
//! ```
//!
//! # Symmetric grasps
//!
//! A parallel-jaw grasp has no natural first jaw. With
//! [`SymmetricSquaredExponentialKernel`] and [`SymmetricFeatureIndex`], a
//! grasp and its relabeled twin ([`swap_halves`]) are the same point.

// Safety: Deny unwrap/expect in library code. Tests may use them (workspace warns).
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod error;
mod index;
mod kernel;
mod matrix;
mod neighborhood;

pub use error::{KernelError, KernelResult};
pub use index::{
    ExhaustiveFeatureIndex, FeatureIndex, Neighbor, NeighborSearch, SUPPORTED_DIMENSIONS,
    SymmetricFeatureIndex, build_feature_index,
};
pub use kernel::{
    FeatureMap, Kernel, SquaredExponentialKernel, SymmetricSquaredExponentialKernel,
    squared_distance, swap_halves,
};
pub use matrix::KernelMatrix;
pub use neighborhood::{CorrelationNeighborhoods, KernelEntry, correlated_components};
