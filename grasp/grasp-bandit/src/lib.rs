//! Correlated multi-armed bandits for ranking grasps.
//!
//! Each candidate grasp is an arm whose reward is a Bernoulli draw with an
//! unknown probability of force closure. The samplers here spend a trial
//! budget on the arms most likely to be best, optionally sharing every
//! outcome with similar grasps through a kernel neighborhood.
//!
//! - **Belief model** - Beta-Bernoulli posteriors with independent and correlated updates
//! - **Samplers** - Uniform allocation, Thompson sampling, correlated Thompson sampling
//! - **Termination** - Iteration, confidence and wall-clock conditions, combined with OR
//! - **Oracle** - The trial seam; simulators and robots implement [`Oracle`]
//!
//! # Layer 0
//!
//! This is a Layer 0 crate with zero Bevy dependencies.
//!
//! # Quick Start
//!
//! ```
//! use grasp_bandit::{
//!     AdaptiveSampler, BernoulliOracle, CorrelatedThompsonSampling, MaxIterTerminationCondition,
//!     SolveParams,
//! };
//! use grasp_kernel::{CorrelationNeighborhoods, FeatureIndex, SquaredExponentialKernel};
//! use nalgebra::DVector;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let features = vec![
//!     DVector::from_vec(vec![0.0, 0.0]),
//!     DVector::from_vec(vec![5.0, 5.0]),
//!     DVector::from_vec(vec![0.0, 0.1]),
//! ];
//! let index = FeatureIndex::<2>::with_features(&features).unwrap();
//! let kernel = SquaredExponentialKernel::new(1.0, 1.0).unwrap();
//! let hoods = CorrelationNeighborhoods::build(&index, &kernel, &features, 0.5).unwrap();
//!
//! let mut oracle = BernoulliOracle::new(vec![0.9, 0.2, 0.9]).unwrap();
//! let mut sampler = CorrelatedThompsonSampling::new(&hoods, ChaCha8Rng::seed_from_u64(0)).unwrap();
//! let result = sampler
//!     .solve(
//!         &mut oracle,
//!         &MaxIterTerminationCondition::new(100),
//!         &SolveParams::default().with_snapshot_rate(10),
//!     )
//!     .unwrap();
//!
//! assert_eq!(result.iters().len(), 11);
//! assert_ne!(result.ranked_arms[0], 1);
//! ```

// Safety: Deny unwrap/expect in library code. Tests may use them (workspace warns).
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod belief;
mod error;
mod objective;
mod oracle;
mod result;
mod sampler;
mod termination;

pub use belief::{BetaBernoulliModel, DEFAULT_PRIOR};
pub use error::{BanditError, BanditResult, OracleError};
pub use objective::{Objective, argmax};
pub use oracle::{BernoulliOracle, Oracle};
pub use result::{Algorithm, SamplingResult, Snapshot, StopReason};
pub use sampler::{
    AdaptiveSampler, CorrelatedThompsonSampling, SolveParams, StepOutcome, ThompsonSampling,
    UniformAllocation,
};
pub use termination::{
    ConfidenceTerminationCondition, MaxIterTerminationCondition, OrTerminationCondition,
    TerminationCondition, TerminationState, TimeoutTerminationCondition,
};
