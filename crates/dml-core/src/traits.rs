//! Core traits for dmlsim
//!
//! The nuisance regressions `g` and `m` are consumed through these traits only:
//! estimation logic (dml-inference) never depends on a concrete learning
//! algorithm, so any regressor satisfying the fit/predict contract can be
//! substituted.

use crate::types::{Dataset, Target};
use crate::Result;

/// A regression learner for one nuisance function.
///
/// Implementations must accept any covariate dimension, regress the numeric
/// `target` column on the covariates of `rows`, and be deterministic for a given
/// `seed`. The other target column is never a feature.
pub trait NuisanceLearner: Send + Sync {
    /// Learner name (e.g. "ridge", "random_forest").
    fn name(&self) -> &str;

    /// Fit on the observations in `rows`.
    fn fit(
        &self,
        data: &Dataset,
        rows: &[usize],
        target: Target,
        seed: u64,
    ) -> Result<Box<dyn FittedNuisance>>;
}

/// A fitted nuisance model.
pub trait FittedNuisance: Send {
    /// Predict the fitted target for the covariate rows `rows` of `data`.
    ///
    /// Returns one value per requested row, in order.
    fn predict(&self, data: &Dataset, rows: &[usize]) -> Result<Vec<f64>>;
}

impl<L: NuisanceLearner + ?Sized> NuisanceLearner for &L {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fit(
        &self,
        data: &Dataset,
        rows: &[usize],
        target: Target,
        seed: u64,
    ) -> Result<Box<dyn FittedNuisance>> {
        (**self).fit(data, rows, target, seed)
    }
}

impl<L: NuisanceLearner + ?Sized> NuisanceLearner for Box<L> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fit(
        &self,
        data: &Dataset,
        rows: &[usize],
        target: Target,
        seed: u64,
    ) -> Result<Box<dyn FittedNuisance>> {
        (**self).fit(data, rows, target, seed)
    }
}
