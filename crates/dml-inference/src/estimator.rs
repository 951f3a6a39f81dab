//! Treatment-effect estimators for the partial-linear model.
//!
//! Every strategy reduces to one moment computation over a `(train, eval)` pair
//! of index sets:
//!
//! - **naive**: `θ̂ = mean_eval(D·(Y − ĝ)) / mean_eval(D²)`
//! - **partialling-out** (DML): `V̂ = D − m̂`,
//!   `θ̂ = mean_eval(V̂·(Y − ĝ)) / mean_eval(V̂·D)`
//!
//! with `ĝ` (target `Y`) and `m̂` (target `D`) fitted on `train`. The strategies
//! only choose the index sets:
//!
//! | strategy        | moment            | folds (train → eval)          |
//! |-----------------|-------------------|-------------------------------|
//! | `naive`         | naive             | S1 → S2                       |
//! | `dml_no_split`  | partialling-out   | all → all                     |
//! | `dml_split`     | partialling-out   | S1 → S2                       |
//! | `dml_cross_fit` | partialling-out   | S1 → S2, S2 → S1 (weighted)   |

use std::fmt;
use std::str::FromStr;

use dml_core::{Dataset, Error, NuisanceLearner, Result, Split, Target};
use serde::{Deserialize, Serialize};

/// Default threshold below which a moment denominator is treated as zero.
pub const DEFAULT_MOMENT_EPSILON: f64 = 1e-12;

/// Estimation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Single outcome regression, no residualisation of `D`.
    Naive,
    /// Partialling-out with fit and evaluation on the full sample.
    DmlNoSplit,
    /// Partialling-out, fit on `S1`, evaluate on `S2`.
    DmlSplit,
    /// Partialling-out in both split directions, size-weighted.
    DmlCrossFit,
}

impl Strategy {
    /// All strategies, in reporting order.
    pub const ALL: [Strategy; 4] =
        [Strategy::Naive, Strategy::DmlNoSplit, Strategy::DmlSplit, Strategy::DmlCrossFit];

    /// `true` if the strategy consumes a [`Split`].
    pub fn uses_split(&self) -> bool {
        !matches!(self, Strategy::DmlNoSplit)
    }

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Naive => "naive",
            Strategy::DmlNoSplit => "dml_no_split",
            Strategy::DmlSplit => "dml_split",
            Strategy::DmlCrossFit => "dml_cross_fit",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "naive" => Ok(Strategy::Naive),
            "dml_no_split" | "no_split" => Ok(Strategy::DmlNoSplit),
            "dml_split" | "split" => Ok(Strategy::DmlSplit),
            "dml_cross_fit" | "cross_fit" | "crossfit" => Ok(Strategy::DmlCrossFit),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown strategy '{other}' (expected naive, dml-no-split, dml-split or dml-cross-fit)"
            ))),
        }
    }
}

fn default_moment_epsilon() -> f64 {
    DEFAULT_MOMENT_EPSILON
}

/// Numerical settings for the moment equation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// `|denominator| <= moment_epsilon` raises [`Error::DegenerateMoment`].
    #[serde(default = "default_moment_epsilon")]
    pub moment_epsilon: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self { moment_epsilon: DEFAULT_MOMENT_EPSILON }
    }
}

impl EstimatorConfig {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if !(self.moment_epsilon.is_finite() && self.moment_epsilon >= 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "moment_epsilon must be finite and >= 0, got {}",
                self.moment_epsilon
            )));
        }
        Ok(())
    }
}

/// One `(train, eval)` evaluation of the moment equation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoldEstimate {
    /// `numerator / denominator`.
    pub theta: f64,
    /// Sample mean of the score numerator over `eval`.
    pub numerator: f64,
    /// Sample mean of the score denominator over `eval`.
    pub denominator: f64,
    /// Training rows.
    pub n_train: usize,
    /// Evaluation rows.
    pub n_eval: usize,
}

/// Estimate from one replicate under one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThetaEstimate {
    /// Strategy used.
    pub strategy: Strategy,
    /// Point estimate.
    pub theta: f64,
    /// Per-fold diagnostics (two for cross-fitting, one otherwise).
    pub folds: Vec<FoldEstimate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Moment {
    Naive,
    PartiallingOut,
}

fn wrap_fit_error(learner: &str, stage: &str, target: Target, e: Error) -> Error {
    let detail = match e {
        Error::FitFailure(msg) => msg,
        other => other.to_string(),
    };
    Error::FitFailure(format!("{learner} {stage} failed (target {target}): {detail}"))
}

fn fit_predict<L: NuisanceLearner + ?Sized>(
    learner: &L,
    data: &Dataset,
    train: &[usize],
    eval: &[usize],
    target: Target,
    seed: u64,
) -> Result<Vec<f64>> {
    let fitted = learner
        .fit(data, train, target, seed)
        .map_err(|e| wrap_fit_error(learner.name(), "fit", target, e))?;
    let pred = fitted
        .predict(data, eval)
        .map_err(|e| wrap_fit_error(learner.name(), "predict", target, e))?;
    if pred.len() != eval.len() {
        return Err(Error::FitFailure(format!(
            "{} returned {} predictions for {} rows (target {target})",
            learner.name(),
            pred.len(),
            eval.len()
        )));
    }
    if pred.iter().any(|v| !v.is_finite()) {
        return Err(Error::FitFailure(format!(
            "{} produced non-finite predictions (target {target})",
            learner.name()
        )));
    }
    Ok(pred)
}

/// Evaluate one moment equation: fit nuisances on `train`, average the score on `eval`.
fn fold_estimate<L: NuisanceLearner + ?Sized>(
    learner: &L,
    data: &Dataset,
    train: &[usize],
    eval: &[usize],
    moment: Moment,
    seed: u64,
    config: &EstimatorConfig,
) -> Result<FoldEstimate> {
    if train.is_empty() || eval.is_empty() {
        return Err(Error::Validation("train and eval index sets must be non-empty".into()));
    }
    let y = data.y();
    let d = data.d();
    let g_hat = fit_predict(learner, data, train, eval, Target::Outcome, seed)?;

    let n = eval.len() as f64;
    let (numerator, denominator) = match moment {
        Moment::Naive => {
            let mut num = 0.0;
            let mut den = 0.0;
            for (k, &i) in eval.iter().enumerate() {
                num += d[i] * (y[i] - g_hat[k]);
                den += d[i] * d[i];
            }
            (num / n, den / n)
        }
        Moment::PartiallingOut => {
            let m_hat =
                fit_predict(learner, data, train, eval, Target::Treatment, seed.wrapping_add(1))?;
            let mut num = 0.0;
            let mut den = 0.0;
            for (k, &i) in eval.iter().enumerate() {
                let v = d[i] - m_hat[k];
                num += v * (y[i] - g_hat[k]);
                den += v * d[i];
            }
            (num / n, den / n)
        }
    };

    if !denominator.is_finite() || denominator.abs() <= config.moment_epsilon {
        return Err(Error::DegenerateMoment { denominator, epsilon: config.moment_epsilon });
    }

    Ok(FoldEstimate {
        theta: numerator / denominator,
        numerator,
        denominator,
        n_train: train.len(),
        n_eval: eval.len(),
    })
}

/// Estimate `θ` from `data` under `strategy`.
///
/// `split` is required for every strategy except [`Strategy::DmlNoSplit`], which
/// ignores it. `seed` seeds the learner fits; fold `k` uses `seed + 2k` for `ĝ`
/// and `seed + 2k + 1` for `m̂`.
pub fn estimate_theta<L: NuisanceLearner + ?Sized>(
    learner: &L,
    data: &Dataset,
    strategy: Strategy,
    split: Option<&Split>,
    seed: u64,
    config: &EstimatorConfig,
) -> Result<ThetaEstimate> {
    config.validate()?;

    let split = if strategy.uses_split() {
        let split = split.ok_or_else(|| {
            Error::InvalidConfiguration(format!("strategy {strategy} requires a sample split"))
        })?;
        if split.n_obs() != data.n_obs() {
            return Err(Error::InvalidConfiguration(format!(
                "split covers {} observations, dataset has {}",
                split.n_obs(),
                data.n_obs()
            )));
        }
        Some(split)
    } else {
        None
    };

    let fold = |train: &[usize], eval: &[usize], moment: Moment, k: u64| {
        fold_estimate(learner, data, train, eval, moment, seed.wrapping_add(2 * k), config)
    };

    let (theta, folds) = match (strategy, split) {
        (Strategy::DmlNoSplit, _) => {
            let all = data.all_rows();
            let f = fold(&all, &all, Moment::PartiallingOut, 0)?;
            (f.theta, vec![f])
        }
        (Strategy::Naive, Some(s)) => {
            let f = fold(s.first(), s.second(), Moment::Naive, 0)?;
            (f.theta, vec![f])
        }
        (Strategy::DmlSplit, Some(s)) => {
            let f = fold(s.first(), s.second(), Moment::PartiallingOut, 0)?;
            (f.theta, vec![f])
        }
        (Strategy::DmlCrossFit, Some(s)) => {
            let f1 = fold(s.first(), s.second(), Moment::PartiallingOut, 0)?;
            let f2 = fold(s.second(), s.first(), Moment::PartiallingOut, 1)?;
            let n1 = s.first().len() as f64;
            let n2 = s.second().len() as f64;
            ((n1 * f1.theta + n2 * f2.theta) / (n1 + n2), vec![f1, f2])
        }
        (_, None) => unreachable!("split presence checked above"),
    };

    Ok(ThetaEstimate { strategy, theta, folds })
}
