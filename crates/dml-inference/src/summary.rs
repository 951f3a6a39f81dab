//! Summary statistics and density estimates for estimate distributions.

use dml_core::{Error, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Quantile for sorted data via linear interpolation.
///
/// - `q=0` returns min
/// - `q=1` returns max
/// - empty input returns `NaN`
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let q = q.clamp(0.0, 1.0);
    let idx = q * ((sorted.len() - 1) as f64);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = idx - lo as f64;
    sorted[lo] + w * (sorted[hi] - sorted[lo])
}

/// Empirical summary of a sampling distribution against the true `θ`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    /// Number of estimates.
    pub n: usize,
    /// True effect the estimates target.
    pub true_theta: f64,
    /// Sample mean.
    pub mean: f64,
    /// Sample standard deviation (`n - 1` denominator; 0 for `n = 1`).
    pub sd: f64,
    /// `mean - true_theta`.
    pub bias: f64,
    /// Root mean squared error against `true_theta`.
    pub rmse: f64,
    /// Monte Carlo standard error of the mean, `sd / sqrt(n)`.
    pub mc_se: f64,
    /// Lower end of the normal 95% interval for the mean.
    pub mean_ci_low: f64,
    /// Upper end of the normal 95% interval for the mean.
    pub mean_ci_high: f64,
    /// Minimum.
    pub min: f64,
    /// 2.5% quantile.
    pub q025: f64,
    /// Median.
    pub median: f64,
    /// 97.5% quantile.
    pub q975: f64,
    /// Maximum.
    pub max: f64,
}

impl DistributionSummary {
    /// Summarise `values` (order irrelevant) against `true_theta`.
    pub fn from_estimates(values: &[f64], true_theta: f64) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::Validation("cannot summarise an empty distribution".into()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("estimates must be finite".into()));
        }
        let n = values.len();
        let nf = n as f64;
        let mean = values.iter().sum::<f64>() / nf;
        let sd = if n > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (nf - 1.0)).sqrt()
        } else {
            0.0
        };
        let rmse = (values.iter().map(|v| (v - true_theta).powi(2)).sum::<f64>() / nf).sqrt();
        let mc_se = sd / nf.sqrt();

        let z = Normal::new(0.0, 1.0)
            .map_err(|e| Error::Computation(format!("standard normal: {e}")))?
            .inverse_cdf(0.975);

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        Ok(Self {
            n,
            true_theta,
            mean,
            sd,
            bias: mean - true_theta,
            rmse,
            mc_se,
            mean_ci_low: mean - z * mc_se,
            mean_ci_high: mean + z * mc_se,
            min: sorted[0],
            q025: quantile_linear_sorted(&sorted, 0.025),
            median: quantile_linear_sorted(&sorted, 0.5),
            q975: quantile_linear_sorted(&sorted, 0.975),
            max: sorted[n - 1],
        })
    }
}

/// Gaussian KDE evaluated on an even grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityGrid {
    /// Kernel bandwidth.
    pub bandwidth: f64,
    /// Grid points.
    pub x: Vec<f64>,
    /// Density at each grid point.
    pub density: Vec<f64>,
}

/// Silverman's rule-of-thumb bandwidth `0.9 · min(sd, IQR/1.34) · n^(-1/5)`.
pub fn silverman_bandwidth(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 1.0;
    }
    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let sd = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (nf - 1.0)).sqrt();
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let iqr = quantile_linear_sorted(&sorted, 0.75) - quantile_linear_sorted(&sorted, 0.25);
    let spread = if iqr > 0.0 { sd.min(iqr / 1.34) } else { sd };
    let h = 0.9 * spread * nf.powf(-0.2);
    if h > 0.0 && h.is_finite() {
        h
    } else {
        1e-3 * mean.abs().max(1.0)
    }
}

/// Gaussian KDE of `values` on `n_points` points spanning `[min - 3h, max + 3h]`.
pub fn gaussian_kde(values: &[f64], n_points: usize) -> Result<DensityGrid> {
    if values.is_empty() {
        return Err(Error::Validation("KDE requires at least one value".into()));
    }
    if n_points < 2 {
        return Err(Error::Validation(format!("KDE grid needs >= 2 points, got {n_points}")));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation("KDE values must be finite".into()));
    }
    let h = silverman_bandwidth(values);
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min) - 3.0 * h;
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max) + 3.0 * h;
    let step = (hi - lo) / (n_points - 1) as f64;
    let norm = 1.0 / (values.len() as f64 * h * (2.0 * std::f64::consts::PI).sqrt());

    let x: Vec<f64> = (0..n_points).map(|i| lo + step * i as f64).collect();
    let density = x
        .iter()
        .map(|&xi| {
            values.iter().map(|&v| (-0.5 * ((xi - v) / h).powi(2)).exp()).sum::<f64>() * norm
        })
        .collect();
    Ok(DensityGrid { bandwidth: h, x, density })
}
