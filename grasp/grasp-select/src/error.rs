//! Error types for grasp-select.

use grasp_bandit::BanditError;
use grasp_kernel::KernelError;
use thiserror::Error;

/// Result type alias for experiment operations.
pub type SelectResult<T> = Result<T, SelectError>;

/// Errors that can occur while configuring or running labeling experiments.
///
/// Only configuration problems abort a run. Unusable candidates, unreadable
/// objects and failed trials are logged and skipped by the driver.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SelectError {
    /// Invalid or missing configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An object could not be read from its source.
    #[error("object {key} unavailable: {reason}")]
    ObjectUnavailable {
        /// Object key.
        key: String,
        /// Why the object could not be read.
        reason: String,
    },

    /// Contact wrenches do not form a valid grasp matrix.
    #[error("invalid contact wrenches: {0}")]
    InvalidWrenches(String),

    /// Kernel or feature index error.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// Bandit construction error.
    #[error(transparent)]
    Bandit(#[from] BanditError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SelectError {
    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Returns `true` for errors caused by the configuration rather than by
    /// one object's data.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }

    /// Creates an object-unavailable error.
    #[must_use]
    pub fn object_unavailable(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ObjectUnavailable {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
