//! # dml-inference
//!
//! Monte Carlo study of treatment-effect estimators in the partial-linear model
//! `Y = θD + g(X) + ε`, `D = m(X) + τ`.
//!
//! This crate provides:
//! - the data-generating process (Toeplitz-correlated Gaussian covariates),
//! - nuisance learners (ridge, random forest, oracle),
//! - the effect estimator (naive, DML without split, DML split, DML cross-fit),
//! - the parallel simulation harness with cancellation,
//! - distribution summaries and CSV / JSON artifacts.
//!
//! ## Architecture
//!
//! Estimators depend on the `NuisanceLearner` trait from dml-core, not on
//! concrete learners. All randomness flows through explicitly seeded `StdRng`s.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// CSV and JSON outputs.
pub mod artifacts;
/// Partial-linear data-generating process.
pub mod dgp;
/// Moment-based effect estimation.
pub mod estimator;
/// Nuisance learners.
pub mod learners;
/// Monte Carlo harness.
pub mod simulation;
/// Random half/half sample splits.
pub mod split;
/// Grid studies over covariate dimensions.
pub mod study;
/// Distribution summaries and KDE.
pub mod summary;

pub use artifacts::{
    read_estimates_csv, read_estimates_csv_path, write_estimates_csv, write_estimates_csv_path,
    SimulationArtifact,
};
pub use dgp::{toeplitz_covariance, DataGenerator, DgpConfig, NuisanceSpec};
pub use estimator::{estimate_theta, EstimatorConfig, FoldEstimate, Strategy, ThetaEstimate};
pub use learners::{LearnerConfig, OracleLearner, RandomForestLearner, RidgeLearner};
pub use simulation::{
    replicate_seed, run_comparison, run_simulation, ReplicateFailure, SimulationConfig,
    SimulationResult,
};
pub use split::draw_split;
pub use study::{run_study, StudyConfig, StudyResult};
pub use summary::{gaussian_kde, DensityGrid, DistributionSummary};
