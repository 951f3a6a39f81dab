//! Partial-linear data-generating process.
//!
//! Draws `N` i.i.d. observations from
//! - `X ~ N(0, Σ)`, `Σ_jk = s^|j-k|`
//! - `D = m(X) + τ`, `τ ~ N(0, σ_D²)`
//! - `Y = θ·D + g(X) + ε`, `ε ~ N(0, σ_Y²)`
//!
//! Randomness comes only from the caller's `StdRng`; the Cholesky factor of `Σ`
//! is computed once per configuration and shared by every replicate.

use std::fmt;
use std::str::FromStr;

use dml_core::{Dataset, Error, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

#[inline]
fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// The two covariates the nuisance pairs load on: `x₁` and `x₃`.
///
/// With fewer than three covariates the last one stands in for `x₃`.
#[inline]
fn loadings(x: &[f64]) -> (f64, f64) {
    (x[0], x[x.len().min(3) - 1])
}

/// Nuisance function pair `(g, m)` of the partial-linear model.
///
/// Every pair loads on `x₁` and `x₃` only. In `full`, `m - 1` is odd and `g` is
/// even in `x`, so the two nuisances are uncorrelated under `X ~ N(0, Σ)` while
/// `E[D] = 1` keeps the naive moment far from `θ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NuisanceSpec {
    /// `g(x) = x₁ + x₃/4`, `m(x) = x₁ + x₃/4`.
    Linear,
    /// `g(x) = σ(x₁) + x₃/4`, `m(x) = x₁ + σ(x₃)/4`.
    Sigmoid,
    /// `g(x) = cos²(x₁) + cos(x₃)/2`, `m(x) = 1/2 + σ(x₁) + sin(x₃)/4`.
    Full,
}

impl NuisanceSpec {
    /// Outcome nuisance `g`.
    pub fn g(&self, x: &[f64]) -> f64 {
        let (x1, x3) = loadings(x);
        match self {
            NuisanceSpec::Linear => x1 + 0.25 * x3,
            NuisanceSpec::Sigmoid => sigmoid(x1) + 0.25 * x3,
            NuisanceSpec::Full => x1.cos().powi(2) + 0.5 * x3.cos(),
        }
    }

    /// Treatment nuisance `m`.
    pub fn m(&self, x: &[f64]) -> f64 {
        let (x1, x3) = loadings(x);
        match self {
            NuisanceSpec::Linear => x1 + 0.25 * x3,
            NuisanceSpec::Sigmoid => x1 + 0.25 * sigmoid(x3),
            NuisanceSpec::Full => 0.5 + sigmoid(x1) + 0.25 * x3.sin(),
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NuisanceSpec::Linear => "linear",
            NuisanceSpec::Sigmoid => "sigmoid",
            NuisanceSpec::Full => "full",
        }
    }
}

impl fmt::Display for NuisanceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NuisanceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(NuisanceSpec::Linear),
            "sigmoid" => Ok(NuisanceSpec::Sigmoid),
            "full" | "trig" | "trig_sigmoid" => Ok(NuisanceSpec::Full),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown nuisance pair '{other}' (expected linear, sigmoid or full)"
            ))),
        }
    }
}

fn default_noise_sd() -> f64 {
    1.0
}

/// Data-generation parameters for one simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DgpConfig {
    /// Observations per dataset (`N`).
    pub n_obs: usize,
    /// Covariate dimension (`p`).
    pub n_covariates: usize,
    /// True treatment effect.
    pub theta: f64,
    /// Toeplitz decay `s` in (0, 1).
    pub decay: f64,
    /// Nuisance pair.
    pub nuisance: NuisanceSpec,
    /// Standard deviation of `τ`.
    #[serde(default = "default_noise_sd")]
    pub treatment_noise_sd: f64,
    /// Standard deviation of `ε`.
    #[serde(default = "default_noise_sd")]
    pub outcome_noise_sd: f64,
}

impl DgpConfig {
    /// Configuration with unit noise on both equations.
    pub fn new(
        n_obs: usize,
        n_covariates: usize,
        theta: f64,
        decay: f64,
        nuisance: NuisanceSpec,
    ) -> Self {
        Self {
            n_obs,
            n_covariates,
            theta,
            decay,
            nuisance,
            treatment_noise_sd: 1.0,
            outcome_noise_sd: 1.0,
        }
    }

    /// Check every parameter; failures are [`Error::InvalidConfiguration`].
    pub fn validate(&self) -> Result<()> {
        if self.n_obs == 0 {
            return Err(Error::InvalidConfiguration("n_obs must be > 0".into()));
        }
        if self.n_covariates == 0 {
            return Err(Error::InvalidConfiguration("n_covariates must be > 0".into()));
        }
        if !self.theta.is_finite() {
            return Err(Error::InvalidConfiguration(format!(
                "theta must be finite, got {}",
                self.theta
            )));
        }
        if !(self.decay > 0.0 && self.decay < 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "decay must lie in (0, 1), got {}",
                self.decay
            )));
        }
        for (name, sd) in [
            ("treatment_noise_sd", self.treatment_noise_sd),
            ("outcome_noise_sd", self.outcome_noise_sd),
        ] {
            if !(sd.is_finite() && sd >= 0.0) {
                return Err(Error::InvalidConfiguration(format!(
                    "{name} must be finite and >= 0, got {sd}"
                )));
            }
        }
        Ok(())
    }
}

/// Toeplitz correlation matrix `Σ_jk = s^|j-k|` of size `p × p`.
pub fn toeplitz_covariance(p: usize, decay: f64) -> DMatrix<f64> {
    DMatrix::from_fn(p, p, |j, k| decay.powi(j.abs_diff(k) as i32))
}

/// Generator bound to one [`DgpConfig`], holding the Cholesky factor of `Σ`.
#[derive(Debug, Clone)]
pub struct DataGenerator {
    config: DgpConfig,
    chol_l: DMatrix<f64>,
}

impl DataGenerator {
    /// Validate `config` and factorise its covariance.
    pub fn new(config: DgpConfig) -> Result<Self> {
        config.validate()?;
        let sigma = toeplitz_covariance(config.n_covariates, config.decay);
        let chol = sigma.cholesky().ok_or_else(|| {
            Error::InvalidConfiguration(format!(
                "covariance with decay {} is not positive definite at p = {}",
                config.decay, config.n_covariates
            ))
        })?;
        Ok(Self { chol_l: chol.l(), config })
    }

    /// Configuration in use.
    pub fn config(&self) -> &DgpConfig {
        &self.config
    }

    /// Draw one dataset.
    pub fn generate(&self, rng: &mut StdRng) -> Result<Dataset> {
        let n = self.config.n_obs;
        let p = self.config.n_covariates;
        let nuisance = self.config.nuisance;

        let mut x = Vec::with_capacity(n * p);
        let mut z = DVector::<f64>::zeros(p);
        for _ in 0..n {
            for j in 0..p {
                z[j] = StandardNormal.sample(rng);
            }
            let row = &self.chol_l * &z;
            x.extend(row.iter());
        }

        let mut d = Vec::with_capacity(n);
        for i in 0..n {
            let tau: f64 = StandardNormal.sample(rng);
            d.push(nuisance.m(&x[i * p..(i + 1) * p]) + self.config.treatment_noise_sd * tau);
        }

        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let eps: f64 = StandardNormal.sample(rng);
            y.push(
                d[i] * self.config.theta
                    + nuisance.g(&x[i * p..(i + 1) * p])
                    + self.config.outcome_noise_sd * eps,
            );
        }

        Dataset::new(n, p, x, y, d)
    }
}

/// One-shot generation: validate, factorise, draw.
pub fn generate(config: &DgpConfig, rng: &mut StdRng) -> Result<Dataset> {
    DataGenerator::new(config.clone())?.generate(rng)
}
