//! Ridge regression nuisance learner.
//!
//! Solves `(X_cᵀX_c + λI) β = X_cᵀ y_c` on column-centred training data, with
//! the intercept recovered as `ȳ - x̄ᵀβ`. The intercept is not penalised.
//!
//! A fixed `λ` suits `p` well below the training size. As `p` approaches the
//! half-sample size the fits chase noise and the partialling-out moment drifts
//! far from `θ`; use [`crate::learners::RandomForestLearner`] there.

use dml_core::{Dataset, Error, FittedNuisance, NuisanceLearner, Result, Target};
use nalgebra::{DMatrix, DVector};

/// Default L2 penalty.
pub const DEFAULT_LAMBDA: f64 = 1.0;

/// Ridge regression learner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RidgeLearner {
    lambda: f64,
}

impl Default for RidgeLearner {
    fn default() -> Self {
        Self { lambda: DEFAULT_LAMBDA }
    }
}

impl RidgeLearner {
    /// Learner with penalty `lambda`.
    pub fn new(lambda: f64) -> Result<Self> {
        if !(lambda.is_finite() && lambda > 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "ridge lambda must be finite and > 0, got {lambda}"
            )));
        }
        Ok(Self { lambda })
    }

    /// L2 penalty `λ > 0`.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

/// Fitted ridge coefficients.
#[derive(Debug, Clone)]
pub struct RidgeFit {
    intercept: f64,
    beta: Vec<f64>,
}

impl RidgeFit {
    /// Intercept term.
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Slope coefficients.
    pub fn coefficients(&self) -> &[f64] {
        &self.beta
    }
}

impl FittedNuisance for RidgeFit {
    fn predict(&self, data: &Dataset, rows: &[usize]) -> Result<Vec<f64>> {
        if data.n_covariates() != self.beta.len() {
            return Err(Error::FitFailure(format!(
                "ridge fitted on {} covariates, asked to predict with {}",
                self.beta.len(),
                data.n_covariates()
            )));
        }
        data.check_rows(rows)?;
        Ok(rows
            .iter()
            .map(|&i| {
                self.intercept
                    + data.row(i).iter().zip(&self.beta).map(|(&x, &b)| x * b).sum::<f64>()
            })
            .collect())
    }
}

impl NuisanceLearner for RidgeLearner {
    fn name(&self) -> &str {
        "ridge"
    }

    fn fit(
        &self,
        data: &Dataset,
        rows: &[usize],
        target: Target,
        _seed: u64,
    ) -> Result<Box<dyn FittedNuisance>> {
        Ok(Box::new(self.fit_ridge(data, rows, target)?))
    }
}

impl RidgeLearner {
    /// Fit and return the concrete coefficients.
    pub fn fit_ridge(&self, data: &Dataset, rows: &[usize], target: Target) -> Result<RidgeFit> {
        if rows.is_empty() {
            return Err(Error::FitFailure("ridge: no training rows".into()));
        }
        data.check_rows(rows)?;

        let n = rows.len();
        let p = data.n_covariates();
        let y = data.target(target);

        let mut x_mean = vec![0.0; p];
        for &i in rows {
            for (m, &v) in x_mean.iter_mut().zip(data.row(i)) {
                *m += v;
            }
        }
        for m in &mut x_mean {
            *m /= n as f64;
        }
        let y_mean = rows.iter().map(|&i| y[i]).sum::<f64>() / n as f64;

        let xc = DMatrix::from_fn(n, p, |r, j| data.row(rows[r])[j] - x_mean[j]);
        let yc = DVector::from_iterator(n, rows.iter().map(|&i| y[i] - y_mean));

        let mut gram = xc.transpose() * &xc;
        for j in 0..p {
            gram[(j, j)] += self.lambda;
        }
        let xty = xc.transpose() * yc;
        let chol = gram.cholesky().ok_or_else(|| {
            Error::FitFailure(format!("ridge: penalised Gram matrix not SPD (target {target})"))
        })?;
        let beta = chol.solve(&xty);

        if beta.iter().any(|b| !b.is_finite()) {
            return Err(Error::FitFailure(format!("ridge: non-finite coefficients (target {target})")));
        }

        let intercept = y_mean - x_mean.iter().zip(beta.iter()).map(|(&m, &b)| m * b).sum::<f64>();
        Ok(RidgeFit { intercept, beta: beta.iter().copied().collect() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn linear_dataset() -> Dataset {
        // y = 1 + 2 x0 - x1, d = 3 - x0
        let rows: Vec<Vec<f64>> =
            (0..40).map(|i| vec![(i % 7) as f64 - 3.0, ((i * 5) % 11) as f64 * 0.5]).collect();
        let y = rows.iter().map(|r| 1.0 + 2.0 * r[0] - r[1]).collect();
        let d = rows.iter().map(|r| 3.0 - r[0]).collect();
        Dataset::from_rows(rows, y, d).unwrap()
    }

    #[test]
    fn test_small_penalty_recovers_ols() {
        let ds = linear_dataset();
        let fit = RidgeLearner::new(1e-9).unwrap().fit_ridge(&ds, &ds.all_rows(), Target::Outcome).unwrap();
        assert_relative_eq!(fit.intercept(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(fit.coefficients()[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(fit.coefficients()[1], -1.0, epsilon = 1e-6);

        let d_fit = RidgeLearner::new(1e-9).unwrap().fit_ridge(&ds, &ds.all_rows(), Target::Treatment).unwrap();
        assert_relative_eq!(d_fit.coefficients()[0], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_penalty_shrinks() {
        let ds = linear_dataset();
        let weak = RidgeLearner::new(1e-6).unwrap().fit_ridge(&ds, &ds.all_rows(), Target::Outcome).unwrap();
        let strong = RidgeLearner::new(1e4).unwrap().fit_ridge(&ds, &ds.all_rows(), Target::Outcome).unwrap();
        assert!(strong.coefficients()[0].abs() < weak.coefficients()[0].abs());
    }

    #[test]
    fn test_predict_on_subset_rows() {
        let ds = linear_dataset();
        let learner = RidgeLearner::new(1e-9).unwrap();
        let fitted = learner.fit(&ds, &(0..20).collect::<Vec<_>>(), Target::Outcome, 0).unwrap();
        let pred = fitted.predict(&ds, &[25, 30]).unwrap();
        assert_relative_eq!(pred[0], ds.y()[25], epsilon = 1e-6);
        assert_relative_eq!(pred[1], ds.y()[30], epsilon = 1e-6);
    }

    #[test]
    fn test_constant_target_predicts_constant() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let ds = Dataset::from_rows(rows, vec![1.0; 10], vec![0.0; 10]).unwrap();
        let fitted = RidgeLearner::default().fit(&ds, &ds.all_rows(), Target::Treatment, 0).unwrap();
        assert!(fitted.predict(&ds, &ds.all_rows()).unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_invalid_lambda_and_empty_rows() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = RidgeLearner::new(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidConfiguration(_)), "{bad}: {err}");
        }
        assert_eq!(RidgeLearner::default().lambda(), DEFAULT_LAMBDA);
        assert_eq!(RidgeLearner::new(2.5).unwrap().lambda(), 2.5);
        let ds = linear_dataset();
        let err = RidgeLearner::default().fit(&ds, &[], Target::Outcome, 0).err().unwrap();
        assert!(matches!(err, Error::FitFailure(_)));
    }
}
