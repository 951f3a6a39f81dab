//! Grid studies: one base data-generating process run over several covariate
//! dimensions and strategies.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use dml_core::{Error, EstimateDistribution, Result};
use serde::{Deserialize, Serialize};

use crate::artifacts::{write_estimates_csv_path, write_json_path, SimulationArtifact};
use crate::dgp::DgpConfig;
use crate::estimator::{EstimatorConfig, Strategy};
use crate::learners::LearnerConfig;
use crate::simulation::{run_comparison, SimulationConfig, SimulationResult};

fn default_strategies() -> Vec<Strategy> {
    Strategy::ALL.to_vec()
}

/// JSON study description.
///
/// ```json
/// {
///   "dgp": {"n_obs": 250, "n_covariates": 1, "theta": 0.5, "decay": 0.5, "nuisance": "full"},
///   "p_values": [1, 10, 100],
///   "learner": {"kind": "random_forest", "n_trees": 100},
///   "n_sim": 1000,
///   "seed": 42
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Base process; `n_covariates` is replaced by each entry of `p_values`.
    pub dgp: DgpConfig,
    /// Covariate dimensions; each becomes a configuration labelled `p=<p>`.
    pub p_values: Vec<usize>,
    /// Strategies compared on identical replicates.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<Strategy>,
    /// Nuisance learner.
    #[serde(default)]
    pub learner: LearnerConfig,
    /// Replicates per configuration.
    pub n_sim: usize,
    /// Root seed shared by every configuration.
    pub seed: u64,
    /// Rayon threads (`0` = global pool).
    #[serde(default)]
    pub n_threads: usize,
    /// Moment-equation settings.
    #[serde(default)]
    pub estimator: EstimatorConfig,
}

impl StudyConfig {
    /// Load from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// One simulation configuration per `p`, in the order given.
    pub fn simulation_configs(&self) -> Result<Vec<SimulationConfig>> {
        if self.p_values.is_empty() {
            return Err(Error::InvalidConfiguration("p_values must not be empty".into()));
        }
        if self.strategies.is_empty() {
            return Err(Error::InvalidConfiguration("strategies must not be empty".into()));
        }
        let configs: Vec<SimulationConfig> = self
            .p_values
            .iter()
            .map(|&p| SimulationConfig {
                label: format!("p={p}"),
                dgp: DgpConfig { n_covariates: p, ..self.dgp.clone() },
                strategy: self.strategies[0],
                n_sim: self.n_sim,
                seed: self.seed,
                n_threads: self.n_threads,
                estimator: self.estimator,
            })
            .collect();
        for cfg in &configs {
            cfg.validate()?;
        }
        Ok(configs)
    }
}

/// Results of a study, one entry per configuration and strategy.
#[derive(Debug, Clone)]
pub struct StudyResult {
    /// Strategies in study order.
    pub strategies: Vec<Strategy>,
    /// Results grouped by configuration, each in strategy order.
    pub runs: Vec<Vec<SimulationResult>>,
}

impl StudyResult {
    /// Distributions of `strategy` across configurations.
    pub fn distributions(&self, strategy: Strategy) -> Vec<EstimateDistribution> {
        self.runs
            .iter()
            .flatten()
            .filter(|r| r.strategy == strategy)
            .map(|r| r.distribution.clone())
            .collect()
    }

    /// Flat list of JSON artifacts.
    pub fn artifacts(&self) -> Vec<SimulationArtifact> {
        self.runs.iter().flatten().map(SimulationArtifact::from_result).collect()
    }

    /// Write `estimates_<strategy>.csv` per strategy and `summary.json` into `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for &strategy in &self.strategies {
            let path = dir.join(format!("estimates_{}.csv", strategy.as_str()));
            write_estimates_csv_path(&path, &self.distributions(strategy))?;
            written.push(path);
        }
        let summary = dir.join("summary.json");
        write_json_path(&summary, &self.artifacts())?;
        written.push(summary);
        Ok(written)
    }
}

/// Run every configuration of `study`. Configuration errors abort before any
/// replicate runs; a tripped `stop` flag leaves the remaining configurations
/// with every replicate cancelled.
pub fn run_study(study: &StudyConfig, stop: Option<&AtomicBool>) -> Result<StudyResult> {
    let configs = study.simulation_configs()?;
    let learner = study.learner.build(study.dgp.nuisance)?;
    let mut runs = Vec::with_capacity(configs.len());
    for cfg in &configs {
        log::debug!("study: running {} with {}", cfg.label, learner.name());
        runs.push(run_comparison(cfg, &study.strategies, learner.as_ref(), stop)?);
    }
    Ok(StudyResult { strategies: study.strategies.clone(), runs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::read_estimates_csv_path;
    use crate::dgp::NuisanceSpec;

    fn study() -> StudyConfig {
        StudyConfig {
            dgp: DgpConfig::new(60, 1, 0.5, 0.5, NuisanceSpec::Sigmoid),
            p_values: vec![1, 4],
            strategies: vec![Strategy::Naive, Strategy::DmlCrossFit],
            learner: LearnerConfig::default(),
            n_sim: 5,
            seed: 9,
            n_threads: 1,
            estimator: EstimatorConfig::default(),
        }
    }

    #[test]
    fn test_study_config_json_defaults() {
        let json = r#"{
            "dgp": {"n_obs": 100, "n_covariates": 1, "theta": 0.5, "decay": 0.5, "nuisance": "full"},
            "p_values": [1, 10],
            "n_sim": 10,
            "seed": 1
        }"#;
        let cfg: StudyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.strategies, Strategy::ALL.to_vec());
        assert_eq!(cfg.learner, LearnerConfig::default());
        let sims = cfg.simulation_configs().unwrap();
        assert_eq!(sims.len(), 2);
        assert_eq!(sims[1].label, "p=10");
        assert_eq!(sims[1].dgp.n_covariates, 10);
    }

    #[test]
    fn test_study_rejects_empty_grid() {
        let mut cfg = study();
        cfg.p_values.clear();
        assert!(matches!(run_study(&cfg, None), Err(Error::InvalidConfiguration(_))));
        let mut cfg = study();
        cfg.p_values.push(0);
        assert!(matches!(run_study(&cfg, None), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_study_writes_outputs() {
        let result = run_study(&study(), None).unwrap();
        assert_eq!(result.runs.len(), 2);
        assert_eq!(result.distributions(Strategy::Naive).len(), 2);

        let dir = std::env::temp_dir().join(format!("dmlsim_study_{}", std::process::id()));
        let written = result.write_to_dir(&dir).unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.join("estimates_dml_cross_fit.csv").exists());

        let back = read_estimates_csv_path(&dir.join("estimates_naive.csv")).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].label, "p=1");
        assert_eq!(back[0].estimates, result.distributions(Strategy::Naive)[0].estimates);

        let summary: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary.as_array().unwrap().len(), 4);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
