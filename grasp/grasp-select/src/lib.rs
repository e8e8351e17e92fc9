//! Grasp labeling experiments over object datasets.
//!
//! Ties the similarity structure of `grasp-kernel` and the samplers of
//! `grasp-bandit` to objects and their candidate grasps:
//!
//! - **Configuration** - [`BanditConfig`], loaded from JSON and validated up front
//! - **Candidates** - [`GraspCandidate`] and the [`GraspTrial`] seam for simulators
//! - **Datasets** - [`ObjectSource`] and the lazy, fault-tolerant [`ObjectSequence`]
//! - **Experiments** - [`label_object`], [`label_chunk`] and result compilation
//! - **Priors** - [`PriorComputation`] transfers evidence from similar objects
//! - **Quality** - [`QualityMetric`] scores contact wrenches
//!
//! # Layer 0
//!
//! This is a Layer 0 crate with zero Bevy dependencies.
//!
//! # Quick Start
//!
//! ```
//! use grasp_select::{
//!     Algorithm, BanditConfig, GraspCandidate, GraspableObject, QualityTrial, label_object,
//! };
//! use nalgebra::DVector;
//!
//! let object = GraspableObject::new("mug").with_candidates(vec![
//!     GraspCandidate::new(0, 0.9).with_features(DVector::from_vec(vec![0.0, 0.0])),
//!     GraspCandidate::new(1, 0.2).with_features(DVector::from_vec(vec![3.0, 3.0])),
//!     GraspCandidate::new(2, 0.85).with_features(DVector::from_vec(vec![0.1, 0.0])),
//! ]);
//! let config = BanditConfig::default()
//!     .with_max_iter(100)
//!     .with_kernel(1.0, 1.0, 0.5)
//!     .with_seed(7);
//!
//! let result = label_object(&object, &config, &mut QualityTrial, None)
//!     .unwrap()
//!     .expect("object has usable candidates");
//!
//! assert_eq!(result.runs.len(), 3);
//! assert_eq!(result.reward(Algorithm::CorrelatedThompsonSampling).len(), 11);
//! ```
//!
//! # Errors
//!
//! Only configuration errors abort. Candidates without features, objects
//! that fail to load or to label and trials that fail are logged with
//! `tracing` and skipped.

// Safety: Deny unwrap/expect in library code. Tests may use them (workspace warns).
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod candidate;
mod config;
mod dataset;
mod error;
mod experiment;
mod prior;
mod quality;

pub use candidate::{CandidateOracle, GraspCandidate, GraspTrial, QualityTrial, alternate_map};
pub use config::BanditConfig;
pub use dataset::{GraspableObject, InMemorySource, ObjectSequence, ObjectSource};
pub use error::{SelectError, SelectResult};
pub use experiment::{
    AlgorithmRun, CompiledResults, CorrelatedExperimentResult, label_chunk, label_object,
    reward_vs_iters,
};
pub use prior::{PriorComputation, PriorEstimate};
pub use quality::{ContactWrenches, QualityMetric, min_norm_in_hull};

pub use grasp_bandit::Algorithm;
