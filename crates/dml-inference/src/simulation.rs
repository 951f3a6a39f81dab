//! Monte Carlo harness: repeat data generation and estimation to build the
//! sampling distribution of `θ̂`.
//!
//! - Replicate `r` is driven by a `StdRng` seeded with `seed + r`; it draws the
//!   dataset, then the split, then the learner seed. The data of a replicate is
//!   therefore the same for every strategy run with the same root seed.
//! - Replicates run in parallel (Rayon) and are collected in replicate order.
//! - A failing replicate is recorded and skipped; configuration errors abort
//!   before any replicate runs.
//! - An optional stop flag is checked before each replicate; replicates not
//!   started when it trips are counted as cancelled.

use std::sync::atomic::{AtomicBool, Ordering};

use dml_core::{Dataset, Error, EstimateDistribution, NuisanceLearner, Result, Split};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dgp::{DataGenerator, DgpConfig};
use crate::estimator::{estimate_theta, EstimatorConfig, Strategy};
use crate::split::draw_split;
use crate::summary::DistributionSummary;

/// One simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Configuration label used in outputs (e.g. `p=100`).
    pub label: String,
    /// Data-generating process.
    pub dgp: DgpConfig,
    /// Estimation strategy.
    pub strategy: Strategy,
    /// Number of replicates.
    pub n_sim: usize,
    /// Root seed; replicate `r` uses `seed + r`.
    pub seed: u64,
    /// Number of Rayon threads (`0` = global pool).
    #[serde(default)]
    pub n_threads: usize,
    /// Moment-equation settings.
    #[serde(default)]
    pub estimator: EstimatorConfig,
}

impl SimulationConfig {
    /// Validate every parameter; failures are [`Error::InvalidConfiguration`].
    pub fn validate(&self) -> Result<()> {
        if self.n_sim == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "[{}] n_sim must be > 0",
                self.label
            )));
        }
        self.dgp
            .validate()
            .and_then(|_| self.estimator.validate())
            .map_err(|e| config_error(&self.label, e))?;
        if self.dgp.n_obs < 2 {
            return Err(Error::InvalidConfiguration(format!(
                "[{}] n_obs must be >= 2 to draw a sample split",
                self.label
            )));
        }
        Ok(())
    }
}

/// Any error raised while setting up configuration `label`, as
/// [`Error::InvalidConfiguration`] prefixed with the label.
fn config_error(label: &str, e: Error) -> Error {
    let detail = match e {
        Error::InvalidConfiguration(msg) => msg,
        other => other.to_string(),
    };
    Error::InvalidConfiguration(format!("[{label}] {detail}"))
}

/// Seed of replicate `replicate` under root seed `seed`.
#[inline]
pub fn replicate_seed(seed: u64, replicate: usize) -> u64 {
    seed.wrapping_add(replicate as u64)
}

/// A replicate that produced no estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateFailure {
    /// Replicate index.
    pub replicate: usize,
    /// Seed that reproduces the replicate.
    pub seed: u64,
    /// Configuration label.
    pub label: String,
    /// Strategy that failed.
    pub strategy: Strategy,
    /// Error message.
    pub error: String,
}

/// Outcome of a simulation run for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Configuration label.
    pub label: String,
    /// Strategy.
    pub strategy: Strategy,
    /// Learner name.
    pub learner: String,
    /// True `θ` of the data-generating process.
    pub true_theta: f64,
    /// Requested replicates.
    pub n_sim: usize,
    /// Estimates of completed replicates, in replicate order.
    pub distribution: EstimateDistribution,
    /// Failed (skipped) replicates.
    pub failures: Vec<ReplicateFailure>,
    /// Replicates not started because of cancellation.
    pub n_cancelled: usize,
    /// Wall time in seconds.
    pub wall_s: f64,
}

impl SimulationResult {
    /// Replicates that produced an estimate.
    pub fn n_completed(&self) -> usize {
        self.distribution.len()
    }

    /// Replicates recorded as failed.
    pub fn n_failed(&self) -> usize {
        self.failures.len()
    }

    /// `true` if the stop flag interrupted the run.
    pub fn was_cancelled(&self) -> bool {
        self.n_cancelled > 0
    }

    /// Summary of the completed estimates against the true `θ`.
    pub fn summary(&self) -> Result<DistributionSummary> {
        DistributionSummary::from_estimates(&self.distribution.estimates, self.true_theta)
    }
}

/// Everything random about one replicate.
#[derive(Debug, Clone)]
pub struct ReplicateDraw {
    /// Generated dataset.
    pub dataset: Dataset,
    /// Sample split of the dataset.
    pub split: Split,
    /// Seed handed to the learner.
    pub learner_seed: u64,
}

/// Draw dataset, split and learner seed for one replicate seed.
pub fn draw_replicate(generator: &DataGenerator, seed: u64) -> Result<ReplicateDraw> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dataset = generator.generate(&mut rng)?;
    let split = draw_split(dataset.n_obs(), &mut rng)?;
    let learner_seed = rng.next_u64();
    Ok(ReplicateDraw { dataset, split, learner_seed })
}

enum Outcome {
    Estimate(f64),
    Failed(String),
}

enum Replicate {
    Done(Vec<Outcome>),
    DrawFailed(String),
    Cancelled,
}

fn run_replicate<L: NuisanceLearner + ?Sized>(
    generator: &DataGenerator,
    learner: &L,
    strategies: &[Strategy],
    seed: u64,
    estimator: &EstimatorConfig,
) -> Replicate {
    let draw = match draw_replicate(generator, seed) {
        Ok(d) => d,
        Err(e) => return Replicate::DrawFailed(e.to_string()),
    };
    let outcomes = strategies
        .iter()
        .map(|&strategy| {
            match estimate_theta(
                learner,
                &draw.dataset,
                strategy,
                Some(&draw.split),
                draw.learner_seed,
                estimator,
            ) {
                Ok(est) => Outcome::Estimate(est.theta),
                Err(e) => Outcome::Failed(e.to_string()),
            }
        })
        .collect();
    Replicate::Done(outcomes)
}

/// Run `config` for several strategies over the same replicates.
///
/// `config.strategy` is ignored in favour of `strategies`. Returns one
/// [`SimulationResult`] per strategy, in the order given.
pub fn run_comparison<L: NuisanceLearner + ?Sized>(
    config: &SimulationConfig,
    strategies: &[Strategy],
    learner: &L,
    stop: Option<&AtomicBool>,
) -> Result<Vec<SimulationResult>> {
    config.validate()?;
    if strategies.is_empty() {
        return Err(Error::InvalidConfiguration(format!(
            "[{}] at least one strategy is required",
            config.label
        )));
    }
    let generator =
        DataGenerator::new(config.dgp.clone()).map_err(|e| config_error(&config.label, e))?;
    let start = std::time::Instant::now();

    let run_all = || -> Vec<Replicate> {
        (0..config.n_sim)
            .into_par_iter()
            .map(|r| {
                if stop.is_some_and(|s| s.load(Ordering::Relaxed)) {
                    return Replicate::Cancelled;
                }
                run_replicate(
                    &generator,
                    learner,
                    strategies,
                    replicate_seed(config.seed, r),
                    &config.estimator,
                )
            })
            .collect()
    };

    let replicates = if config.n_threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.n_threads)
            .build()
            .map_err(|e| Error::Computation(format!("failed to create thread pool: {e}")))?;
        pool.install(run_all)
    } else {
        run_all()
    };

    let mut results: Vec<SimulationResult> = strategies
        .iter()
        .map(|&strategy| SimulationResult {
            label: config.label.clone(),
            strategy,
            learner: learner.name().to_string(),
            true_theta: config.dgp.theta,
            n_sim: config.n_sim,
            distribution: EstimateDistribution::new(config.label.clone()),
            failures: Vec::new(),
            n_cancelled: 0,
            wall_s: 0.0,
        })
        .collect();

    for (r, replicate) in replicates.into_iter().enumerate() {
        let seed = replicate_seed(config.seed, r);
        match replicate {
            Replicate::Done(outcomes) => {
                for (res, outcome) in results.iter_mut().zip(outcomes) {
                    match outcome {
                        Outcome::Estimate(theta) => res.distribution.push(r, theta),
                        Outcome::Failed(error) => res.failures.push(ReplicateFailure {
                            replicate: r,
                            seed,
                            label: config.label.clone(),
                            strategy: res.strategy,
                            error,
                        }),
                    }
                }
            }
            Replicate::DrawFailed(error) => {
                for res in results.iter_mut() {
                    res.failures.push(ReplicateFailure {
                        replicate: r,
                        seed,
                        label: config.label.clone(),
                        strategy: res.strategy,
                        error: error.clone(),
                    });
                }
            }
            Replicate::Cancelled => {
                for res in results.iter_mut() {
                    res.n_cancelled += 1;
                }
            }
        }
    }

    let wall_s = start.elapsed().as_secs_f64();
    for res in results.iter_mut() {
        res.wall_s = wall_s;
        if let Some(first) = res.failures.first() {
            log::warn!(
                "[{}] {}: skipped {} of {} replicates (first: replicate {} seed {}: {})",
                res.label,
                res.strategy,
                res.failures.len(),
                res.n_sim,
                first.replicate,
                first.seed,
                first.error
            );
        }
        if res.n_cancelled > 0 {
            log::warn!(
                "[{}] {}: cancelled after {} replicates ({} not started)",
                res.label,
                res.strategy,
                res.n_sim - res.n_cancelled,
                res.n_cancelled
            );
        }
        log::debug!(
            "[{}] {}: {} estimates in {:.3}s",
            res.label,
            res.strategy,
            res.n_completed(),
            wall_s
        );
    }

    Ok(results)
}

/// Run `config` (single strategy) with `learner`.
///
/// `stop` may be shared with another thread; setting it stops new replicates
/// from starting and the partial distribution is returned.
pub fn run_simulation<L: NuisanceLearner + ?Sized>(
    config: &SimulationConfig,
    learner: &L,
    stop: Option<&AtomicBool>,
) -> Result<SimulationResult> {
    let mut results = run_comparison(config, &[config.strategy], learner, stop)?;
    results
        .pop()
        .ok_or_else(|| Error::Computation("simulation produced no result".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dgp::NuisanceSpec;
    use crate::learners::{OracleLearner, RidgeLearner};
    use dml_core::{FittedNuisance, Target};
    use std::sync::atomic::AtomicUsize;

    fn config(strategy: Strategy, n_sim: usize) -> SimulationConfig {
        SimulationConfig {
            label: "p=3".into(),
            dgp: DgpConfig::new(80, 3, 0.5, 0.5, NuisanceSpec::Sigmoid),
            strategy,
            n_sim,
            seed: 1234,
            n_threads: 2,
            estimator: EstimatorConfig::default(),
        }
    }

    /// Fails the outcome fit whenever handed one of `unlucky` learner seeds.
    struct FlakyLearner {
        unlucky: Vec<u64>,
    }

    impl FlakyLearner {
        /// Fails exactly on `replicates` of `cfg`.
        fn failing_on(cfg: &SimulationConfig, replicates: &[usize]) -> Self {
            let generator = DataGenerator::new(cfg.dgp.clone()).unwrap();
            let unlucky = replicates
                .iter()
                .map(|&r| draw_replicate(&generator, replicate_seed(cfg.seed, r)).unwrap().learner_seed)
                .collect();
            Self { unlucky }
        }
    }

    impl NuisanceLearner for FlakyLearner {
        fn name(&self) -> &str {
            "flaky"
        }

        fn fit(
            &self,
            data: &Dataset,
            rows: &[usize],
            target: Target,
            seed: u64,
        ) -> Result<Box<dyn FittedNuisance>> {
            if self.unlucky.contains(&seed) && target == Target::Outcome {
                return Err(Error::Computation("unlucky seed".into()));
            }
            RidgeLearner::default().fit(data, rows, target, seed)
        }
    }

    /// Trips the stop flag after a fixed number of fits.
    struct StoppingLearner<'a> {
        stop: &'a AtomicBool,
        fits: AtomicUsize,
        limit: usize,
    }

    impl NuisanceLearner for StoppingLearner<'_> {
        fn name(&self) -> &str {
            "stopping"
        }

        fn fit(
            &self,
            data: &Dataset,
            rows: &[usize],
            target: Target,
            seed: u64,
        ) -> Result<Box<dyn FittedNuisance>> {
            if self.fits.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                self.stop.store(true, Ordering::SeqCst);
            }
            RidgeLearner::default().fit(data, rows, target, seed)
        }
    }

    #[test]
    fn test_run_is_reproducible() {
        let cfg = config(Strategy::DmlCrossFit, 12);
        let a = run_simulation(&cfg, &RidgeLearner::default(), None).unwrap();
        let mut single_thread = cfg.clone();
        single_thread.n_threads = 1;
        let b = run_simulation(&single_thread, &RidgeLearner::default(), None).unwrap();
        assert_eq!(a.distribution, b.distribution);
        assert_eq!(a.n_completed(), 12);
        assert_eq!(a.distribution.replicates, (0..12).collect::<Vec<_>>());
        assert!(!a.was_cancelled());
    }

    #[test]
    fn test_comparison_matches_individual_runs() {
        let cfg = config(Strategy::Naive, 6);
        let learner = RidgeLearner::default();
        let all = run_comparison(&cfg, &Strategy::ALL, &learner, None).unwrap();
        assert_eq!(all.len(), 4);
        for res in &all {
            let mut single = cfg.clone();
            single.strategy = res.strategy;
            let alone = run_simulation(&single, &learner, None).unwrap();
            assert_eq!(alone.distribution, res.distribution, "{}", res.strategy);
        }
    }

    #[test]
    fn test_oracle_split_distribution_centred() {
        let mut cfg = config(Strategy::DmlSplit, 200);
        cfg.dgp = DgpConfig::new(250, 10, 0.5, 0.5, NuisanceSpec::Full);
        let res = run_simulation(&cfg, &OracleLearner::new(NuisanceSpec::Full), None).unwrap();
        let summary = res.summary().unwrap();
        assert_eq!(summary.n, 200);
        assert!(summary.bias.abs() < 0.03, "bias = {}", summary.bias);
    }

    #[test]
    fn test_failures_are_recorded_and_skipped() {
        let cfg = config(Strategy::DmlSplit, 20);
        let res = run_simulation(&cfg, &FlakyLearner::failing_on(&cfg, &[3, 11]), None).unwrap();
        assert_eq!(res.n_failed(), 2);
        assert_eq!(res.n_completed(), 18);
        assert_eq!(res.failures.iter().map(|f| f.replicate).collect::<Vec<_>>(), vec![3, 11]);
        for f in &res.failures {
            assert_eq!(f.label, "p=3");
            assert_eq!(f.strategy, Strategy::DmlSplit);
            assert_eq!(f.seed, replicate_seed(1234, f.replicate));
            assert!(f.error.contains("unlucky seed"), "{}", f.error);
            assert!(!res.distribution.replicates.contains(&f.replicate));
        }
        assert_eq!(res.summary().unwrap().n, 18);
    }

    #[test]
    fn test_failures_are_per_strategy() {
        // Every strategy fits the outcome with the replicate's learner seed first.
        let cfg = config(Strategy::Naive, 8);
        let learner = FlakyLearner::failing_on(&cfg, &[5]);
        let results = run_comparison(&cfg, &Strategy::ALL, &learner, None).unwrap();
        for res in &results {
            assert_eq!(res.n_failed(), 1, "{}", res.strategy);
            assert_eq!(res.failures[0].replicate, 5);
            assert_eq!(res.n_completed(), 7);
        }
    }

    #[test]
    fn test_degenerate_replicates_do_not_abort() {
        let mut cfg = config(Strategy::DmlSplit, 5);
        cfg.dgp.treatment_noise_sd = 0.0;
        // With the oracle and no treatment noise, V̂ = 0 in every replicate.
        let res = run_simulation(&cfg, &OracleLearner::new(NuisanceSpec::Sigmoid), None).unwrap();
        assert_eq!(res.n_completed(), 0);
        assert_eq!(res.n_failed(), 5);
        assert!(res.failures[0].error.starts_with("Degenerate moment"));
        assert!(res.summary().is_err());
    }

    #[test]
    fn test_configuration_errors_abort_before_replicates() {
        let learner = StoppingLearner { stop: &AtomicBool::new(false), fits: AtomicUsize::new(0), limit: 1000 };
        for bad in [
            SimulationConfig { n_sim: 0, ..config(Strategy::DmlSplit, 1) },
            SimulationConfig { dgp: DgpConfig::new(0, 3, 0.5, 0.5, NuisanceSpec::Full), ..config(Strategy::DmlSplit, 5) },
            SimulationConfig { dgp: DgpConfig::new(50, 3, 0.5, 1.5, NuisanceSpec::Full), ..config(Strategy::DmlSplit, 5) },
        ] {
            let err = run_simulation(&bad, &learner, None).unwrap_err();
            assert!(matches!(err, Error::InvalidConfiguration(_)), "{err}");
            assert!(err.to_string().contains("p=3"), "{err}");
        }
        assert_eq!(learner.fits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_setup_errors_are_labelled_configuration_errors() {
        let err = config_error("p=100", Error::Computation("Cholesky failed".into()));
        match err {
            Error::InvalidConfiguration(msg) => assert_eq!(msg, "[p=100] Computation error: Cholesky failed"),
            other => panic!("expected InvalidConfiguration, got {other}"),
        }
        let err = config_error("p=1", Error::InvalidConfiguration("decay must lie in (0, 1)".into()));
        assert_eq!(err.to_string(), "Invalid configuration: [p=1] decay must lie in (0, 1)");
    }

    #[test]
    fn test_cancellation_keeps_partial_results() {
        let stop = AtomicBool::new(false);
        // Two fits per DML-split replicate; trip after the third replicate's fits.
        let learner = StoppingLearner { stop: &stop, fits: AtomicUsize::new(0), limit: 6 };
        let mut cfg = config(Strategy::DmlSplit, 50);
        cfg.n_threads = 1;
        let res = run_simulation(&cfg, &learner, Some(&stop)).unwrap();
        assert!(res.was_cancelled());
        assert_eq!(res.n_completed(), 3);
        assert_eq!(res.n_completed() + res.n_cancelled, 50);
        assert!(res.distribution.estimates.iter().all(|t| t.is_finite()));
    }

    #[test]
    fn test_pre_set_stop_flag_runs_nothing() {
        let stop = AtomicBool::new(true);
        let res = run_simulation(&config(Strategy::Naive, 8), &RidgeLearner::default(), Some(&stop))
            .unwrap();
        assert_eq!(res.n_completed(), 0);
        assert_eq!(res.n_cancelled, 8);
    }
}
