//! Nuisance learners shipped with dmlsim.
//!
//! - [`RandomForestLearner`]: bagged regression trees (default).
//! - [`RidgeLearner`]: centred ridge regression, for `p` well below `N / 2`.
//! - [`OracleLearner`]: returns the true `g` / `m` of the data-generating process.

pub mod forest;
pub mod oracle;
pub mod ridge;

pub use forest::{ForestConfig, ForestFit, RandomForestLearner};
pub use oracle::OracleLearner;
pub use ridge::{RidgeFit, RidgeLearner};

use dml_core::{NuisanceLearner, Result};
use serde::{Deserialize, Serialize};

use crate::dgp::NuisanceSpec;

/// Serializable learner selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearnerConfig {
    /// Ridge regression with penalty `lambda`.
    Ridge {
        /// L2 penalty.
        #[serde(default = "default_lambda")]
        lambda: f64,
    },
    /// Random forest.
    RandomForest(ForestConfig),
    /// True nuisance functions of the configured DGP.
    Oracle,
}

fn default_lambda() -> f64 {
    ridge::DEFAULT_LAMBDA
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig::RandomForest(ForestConfig::default())
    }
}

impl LearnerConfig {
    /// Instantiate the learner; `nuisance` is only consulted by the oracle.
    pub fn build(&self, nuisance: NuisanceSpec) -> Result<Box<dyn NuisanceLearner>> {
        Ok(match self {
            LearnerConfig::Ridge { lambda } => Box::new(RidgeLearner::new(*lambda)?),
            LearnerConfig::RandomForest(cfg) => Box::new(RandomForestLearner::new(cfg.clone())?),
            LearnerConfig::Oracle => Box::new(OracleLearner::new(nuisance)),
        })
    }
}
