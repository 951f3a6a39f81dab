//! Oracle nuisance learner: ignores the training data and returns the true
//! structural `g` (target `Y`) or `m` (target `D`) of the data-generating process.

use dml_core::{Dataset, FittedNuisance, NuisanceLearner, Result, Target};

use crate::dgp::NuisanceSpec;

/// Perfect nuisance fitter for a known [`NuisanceSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleLearner {
    spec: NuisanceSpec,
}

impl OracleLearner {
    /// Oracle for `spec`.
    pub fn new(spec: NuisanceSpec) -> Self {
        Self { spec }
    }
}

struct OracleFit {
    spec: NuisanceSpec,
    target: Target,
}

impl FittedNuisance for OracleFit {
    fn predict(&self, data: &Dataset, rows: &[usize]) -> Result<Vec<f64>> {
        data.check_rows(rows)?;
        Ok(rows
            .iter()
            .map(|&i| match self.target {
                Target::Outcome => self.spec.g(data.row(i)),
                Target::Treatment => self.spec.m(data.row(i)),
            })
            .collect())
    }
}

impl NuisanceLearner for OracleLearner {
    fn name(&self) -> &str {
        "oracle"
    }

    fn fit(
        &self,
        data: &Dataset,
        rows: &[usize],
        target: Target,
        _seed: u64,
    ) -> Result<Box<dyn FittedNuisance>> {
        data.check_rows(rows)?;
        Ok(Box::new(OracleFit { spec: self.spec, target }))
    }
}
