//! Records produced by a sampler run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The sampling algorithm that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Round-robin over all arms with independent updates.
    UniformAllocation,
    /// Thompson sampling with independent updates.
    ThompsonSampling,
    /// Thompson sampling with kernel-correlated updates.
    CorrelatedThompsonSampling,
}

impl Algorithm {
    /// All algorithms, in the order the driver runs them.
    pub const ALL: [Self; 3] = [
        Self::UniformAllocation,
        Self::ThompsonSampling,
        Self::CorrelatedThompsonSampling,
    ];

    /// Short label used in logs and compiled results.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::UniformAllocation => "ua",
            Self::ThompsonSampling => "ts",
            Self::CorrelatedThompsonSampling => "ts_corr",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Progress record taken every `snapshot_rate` iterations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Iterations completed when the snapshot was taken.
    pub iteration: usize,
    /// Arm with the highest posterior mean, if any arm was selectable.
    pub best_arm: Option<usize>,
    /// Posterior mean of `best_arm` (`0.0` when there is none).
    pub best_mean: f64,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A termination condition fired.
    Condition,
    /// The hard iteration cap was reached.
    IterationCap,
    /// Every arm had been disabled by oracle failures.
    NoSelectableArms,
}

/// Immutable outcome of one `solve` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingResult {
    /// Algorithm that produced the run.
    pub algorithm: Algorithm,
    /// Snapshots in iteration order.
    pub snapshots: Vec<Snapshot>,
    /// Total iterations run.
    pub iterations: usize,
    /// Posterior mean of every arm at the end of the run, indexed by arm.
    /// Disabled arms keep the mean they had when they were disabled.
    pub final_means: Vec<f64>,
    /// Arms still selectable at the end of the run, ordered by final
    /// posterior mean, best first. Disabled arms are left out.
    pub ranked_arms: Vec<usize>,
    /// Arms that were disabled by oracle failures, ascending.
    pub disabled_arms: Vec<usize>,
    /// Why the run ended.
    pub stop_reason: StopReason,
}

impl SamplingResult {
    /// Iteration numbers of the snapshots.
    #[must_use]
    pub fn iters(&self) -> Vec<usize> {
        self.snapshots.iter().map(|s| s.iteration).collect()
    }

    /// Leading arm at each snapshot.
    #[must_use]
    pub fn best_arms(&self) -> Vec<Option<usize>> {
        self.snapshots.iter().map(|s| s.best_arm).collect()
    }

    /// Top `k` selectable arms with their final posterior means, best first.
    #[must_use]
    pub fn best_candidates(&self, k: usize) -> Vec<(usize, f64)> {
        self.ranked_arms
            .iter()
            .take(k)
            .filter_map(|&arm| Some((arm, *self.final_means.get(arm)?)))
            .collect()
    }

    /// Last snapshot taken at or before `iteration`.
    #[must_use]
    pub fn snapshot_at(&self, iteration: usize) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .take_while(|s| s.iteration <= iteration)
            .last()
    }
}
