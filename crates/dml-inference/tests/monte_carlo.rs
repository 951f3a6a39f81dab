//! End-to-end Monte Carlo checks of the estimator strategies.

use std::sync::atomic::AtomicBool;

use dml_inference::learners::ForestConfig;
use dml_inference::{
    read_estimates_csv, run_comparison, run_simulation, write_estimates_csv, DgpConfig,
    DistributionSummary, EstimatorConfig, NuisanceSpec, OracleLearner, RandomForestLearner, RidgeLearner,
    SimulationConfig, Strategy,
};

fn config(dgp: DgpConfig, strategy: Strategy, n_sim: usize, seed: u64) -> SimulationConfig {
    SimulationConfig {
        label: format!("p={}", dgp.n_covariates),
        dgp,
        strategy,
        n_sim,
        seed,
        n_threads: 0,
        estimator: EstimatorConfig::default(),
    }
}

#[test]
fn oracle_split_and_cross_fit_are_centred() {
    let dgp = DgpConfig::new(250, 10, 0.5, 0.5, NuisanceSpec::Full);
    let cfg = config(dgp, Strategy::DmlSplit, 200, 2024);
    let oracle = OracleLearner::new(NuisanceSpec::Full);
    let results =
        run_comparison(&cfg, &[Strategy::DmlSplit, Strategy::DmlCrossFit], &oracle, None).unwrap();
    for res in &results {
        let s = res.summary().unwrap();
        assert_eq!(s.n, 200, "{}", res.strategy);
        assert!((s.mean - 0.5).abs() < 0.05, "{}: mean = {}", res.strategy, s.mean);
    }
    // Cross-fitting uses every observation for evaluation.
    let sd_split = results[0].summary().unwrap().sd;
    let sd_cross = results[1].summary().unwrap().sd;
    assert!(sd_cross < sd_split, "cross-fit sd {sd_cross} vs split sd {sd_split}");
}

#[test]
fn naive_is_biased_where_split_dml_is_not() {
    let dgp = DgpConfig::new(400, 5, 0.5, 0.5, NuisanceSpec::Linear);
    let cfg = config(dgp, Strategy::Naive, 200, 77);
    let results =
        run_comparison(&cfg, &[Strategy::Naive, Strategy::DmlSplit], &RidgeLearner::default(), None)
            .unwrap();
    let naive = results[0].summary().unwrap();
    let split = results[1].summary().unwrap();
    assert!((split.mean - 0.5).abs() < 0.05, "dml-split mean = {}", split.mean);
    assert!(naive.bias.abs() > split.bias.abs() + 0.1, "naive {naive:?} vs split {split:?}");
}

#[test]
fn estimates_survive_csv_round_trip() {
    let runs: Vec<_> = [1usize, 10]
        .into_iter()
        .map(|p| {
            let dgp = DgpConfig::new(80, p, 0.5, 0.5, NuisanceSpec::Sigmoid);
            run_simulation(&config(dgp, Strategy::DmlCrossFit, 15, 5), &RidgeLearner::default(), None)
                .unwrap()
        })
        .collect();
    let dists: Vec<_> = runs.iter().map(|r| r.distribution.clone()).collect();

    let mut buf = Vec::new();
    write_estimates_csv(&mut buf, &dists).unwrap();
    assert!(String::from_utf8_lossy(&buf).starts_with("p=1,p=10\n"));
    let back = read_estimates_csv(buf.as_slice()).unwrap();
    assert_eq!(back, dists);
}

#[test]
fn tripped_flag_cancels_whole_run() {
    let stop = AtomicBool::new(true);
    let dgp = DgpConfig::new(50, 2, 0.5, 0.5, NuisanceSpec::Full);
    let res = run_simulation(&config(dgp, Strategy::DmlSplit, 10, 1), &RidgeLearner::default(), Some(&stop))
        .unwrap();
    assert_eq!(res.n_cancelled, 10);
    assert!(res.summary().is_err());
}

/// Naive vs DML-split on the full nuisance pair at N=250, p=100 with the default
/// random forest.
fn forest_study(n_sim: usize, seed: u64) -> (DistributionSummary, DistributionSummary) {
    let dgp = DgpConfig::new(250, 100, 0.5, 0.5, NuisanceSpec::Full);
    let cfg = config(dgp, Strategy::DmlSplit, n_sim, seed);
    let forest = RandomForestLearner::new(ForestConfig::default()).unwrap();
    let results =
        run_comparison(&cfg, &[Strategy::Naive, Strategy::DmlSplit], &forest, None).unwrap();
    assert!(results.iter().all(|r| r.n_completed() == n_sim));
    (results[0].summary().unwrap(), results[1].summary().unwrap())
}

#[test]
fn forest_split_beats_naive_at_high_dimension() {
    let (naive, split) = forest_study(40, 7);
    assert!((split.mean - 0.5).abs() < 0.1, "dml-split mean = {}", split.mean);
    assert!(naive.bias.abs() > split.bias.abs() + 0.1, "naive {naive:?} vs split {split:?}");
}

/// Full-scale study: 1000 replicates. Takes minutes in release mode.
#[test]
#[ignore]
fn full_scale_forest_study() {
    let (naive, split) = forest_study(1000, 42);
    assert!((split.mean - 0.5).abs() < 0.05, "dml-split mean = {}", split.mean);
    assert!((naive.mean - 0.5).abs() > (split.mean - 0.5).abs(), "naive mean = {}", naive.mean);
}
