//! # dml-core
//!
//! Core types and traits for dmlsim.
//!
//! This crate provides:
//! - the workspace error type ([`Error`], [`Result`]),
//! - the partial-linear [`Dataset`], sample [`Split`] and [`EstimateDistribution`],
//! - the nuisance learner capability ([`NuisanceLearner`], [`FittedNuisance`]).
//!
//! It carries no numerical dependencies; data generation, learners and
//! estimators live in `dml-inference`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;
/// Learner traits.
pub mod traits;
/// Dataset, split and distribution types.
pub mod types;

pub use error::{Error, Result};
pub use traits::{FittedNuisance, NuisanceLearner};
pub use types::{Dataset, EstimateDistribution, Split, Target};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
