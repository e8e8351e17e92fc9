//! Stopping rules for a sampler run.
//!
//! Conditions are predicates over a read-only [`TerminationState`]. They hold
//! no per-run state, so one condition can be shared by any number of
//! `solve` calls.

use std::fmt;
use std::time::Duration;

use crate::belief::BetaBernoulliModel;
use crate::error::{BanditError, BanditResult};

/// What a termination condition may look at.
#[derive(Debug, Clone, Copy)]
pub struct TerminationState<'a> {
    /// Iterations completed so far.
    pub iteration: usize,
    /// Wall-clock time since the run started.
    pub elapsed: Duration,
    /// Current beliefs.
    pub model: &'a BetaBernoulliModel,
    /// Arm with the highest posterior mean among selectable arms.
    pub leader: Option<usize>,
}

/// Predicate deciding when a run stops.
pub trait TerminationCondition: Send + Sync + fmt::Debug {
    /// Returns `true` if the run should stop now.
    fn should_terminate(&self, state: &TerminationState<'_>) -> bool;
}

/// Stops once `max_iters` iterations have been run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxIterTerminationCondition {
    max_iters: usize,
}

impl MaxIterTerminationCondition {
    /// Creates the condition.
    #[must_use]
    pub const fn new(max_iters: usize) -> Self {
        Self { max_iters }
    }

    /// Iteration limit.
    #[must_use]
    pub const fn max_iters(&self) -> usize {
        self.max_iters
    }
}

impl TerminationCondition for MaxIterTerminationCondition {
    fn should_terminate(&self, state: &TerminationState<'_>) -> bool {
        state.iteration >= self.max_iters
    }
}

/// Stops once the leading arm's credible interval is narrow enough.
///
/// With confidence `c`, the run stops when the half-width of the leader's
/// `c` credible interval drops below `1 - c`. A custom threshold can be set
/// with [`ConfidenceTerminationCondition::with_half_width`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceTerminationCondition {
    confidence: f64,
    half_width: f64,
}

impl ConfidenceTerminationCondition {
    /// Creates the condition for a confidence level in `(0, 1)`.
    ///
    /// # Errors
    ///
    /// Returns an error if `confidence` is outside `(0, 1)`.
    pub fn new(confidence: f64) -> BanditResult<Self> {
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(BanditError::invalid_parameter(format!(
                "confidence must be in (0, 1), got {confidence}"
            )));
        }
        Ok(Self {
            confidence,
            half_width: 1.0 - confidence,
        })
    }

    /// Overrides the half-width threshold.
    ///
    /// # Errors
    ///
    /// Returns an error unless `half_width` is positive and finite.
    pub fn with_half_width(mut self, half_width: f64) -> BanditResult<Self> {
        if !(half_width.is_finite() && half_width > 0.0) {
            return Err(BanditError::invalid_parameter(format!(
                "half-width threshold must be positive, got {half_width}"
            )));
        }
        self.half_width = half_width;
        Ok(self)
    }

    /// Confidence level.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Half-width threshold.
    #[must_use]
    pub const fn half_width(&self) -> f64 {
        self.half_width
    }
}

impl TerminationCondition for ConfidenceTerminationCondition {
    fn should_terminate(&self, state: &TerminationState<'_>) -> bool {
        state.leader.is_some_and(|arm| {
            arm < state.model.num_arms()
                && state.model.credible_half_width(arm, self.confidence) < self.half_width
        })
    }
}

/// Stops once the run has used its wall-clock budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutTerminationCondition {
    budget: Duration,
}

impl TimeoutTerminationCondition {
    /// Creates the condition.
    #[must_use]
    pub const fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

impl TerminationCondition for TimeoutTerminationCondition {
    fn should_terminate(&self, state: &TerminationState<'_>) -> bool {
        state.elapsed >= self.budget
    }
}

/// Stops as soon as any sub-condition fires.
///
/// An empty disjunction never fires; the sampler's iteration cap still
/// applies.
#[derive(Debug, Default)]
pub struct OrTerminationCondition {
    conditions: Vec<Box<dyn TerminationCondition>>,
}

impl OrTerminationCondition {
    /// Creates the disjunction.
    #[must_use]
    pub fn new(conditions: Vec<Box<dyn TerminationCondition>>) -> Self {
        Self { conditions }
    }

    /// Adds a sub-condition.
    #[must_use]
    pub fn with(mut self, condition: impl TerminationCondition + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    /// Number of sub-conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Returns `true` if there are no sub-conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl TerminationCondition for OrTerminationCondition {
    fn should_terminate(&self, state: &TerminationState<'_>) -> bool {
        self.conditions.iter().any(|c| c.should_terminate(state))
    }
}
