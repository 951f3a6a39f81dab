//! Error types for dmlsim

use thiserror::Error;

/// dmlsim error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid simulation or data-generation configuration.
    ///
    /// Raised before any replicate executes.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The denominator of the moment equation is (numerically) zero.
    #[error("Degenerate moment: |denominator| = {denominator:e} is within epsilon = {epsilon:e}")]
    DegenerateMoment {
        /// Denominator value that triggered the error.
        denominator: f64,
        /// Threshold in effect.
        epsilon: f64,
    },

    /// A nuisance learner failed to fit or predict.
    #[error("Fit failure: {0}")]
    FitFailure(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// `true` for errors that invalidate a single replicate but not the run.
    pub fn is_replicate_local(&self) -> bool {
        matches!(
            self,
            Error::DegenerateMoment { .. } | Error::FitFailure(_) | Error::Computation(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
