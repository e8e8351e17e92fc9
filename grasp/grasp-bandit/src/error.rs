//! Error types for bandit construction and oracle trials.

use thiserror::Error;

/// Result type for bandit operations.
pub type BanditResult<T> = Result<T, BanditError>;

/// Errors raised while configuring or updating a bandit.
///
/// These are configuration or programming errors; recoverable trial failures
/// are reported separately as [`OracleError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BanditError {
    /// The candidate set is empty.
    #[error("no arms to sample")]
    NoArms,

    /// An arm index is outside the candidate set.
    #[error("arm {arm} out of range for {arms} arms")]
    ArmOutOfRange {
        /// The invalid arm index.
        arm: usize,
        /// Number of arms in the model.
        arms: usize,
    },

    /// A per-arm input has the wrong length.
    #[error("expected {expected} per-arm values, got {found}")]
    LengthMismatch {
        /// Number of arms in the model.
        expected: usize,
        /// Number of values supplied.
        found: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl BanditError {
    /// Create an invalid parameter error.
    #[must_use]
    pub fn invalid_parameter(details: impl Into<String>) -> Self {
        Self::InvalidParameter(details.into())
    }
}

/// Failure of the process that produces a grasp trial outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// The oracle has no candidate with this index.
    #[error("oracle has no arm {0}")]
    UnknownArm(usize),

    /// The trial could not be carried out for this arm.
    #[error("trial failed for arm {arm}: {reason}")]
    TrialFailed {
        /// The arm whose trial failed.
        arm: usize,
        /// Description of the failure.
        reason: String,
    },
}

impl OracleError {
    /// Create a trial failure.
    #[must_use]
    pub fn trial_failed(arm: usize, reason: impl Into<String>) -> Self {
        Self::TrialFailed {
            arm,
            reason: reason.into(),
        }
    }
}
