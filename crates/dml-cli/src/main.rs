//! dmlsim CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use dml_inference::learners::{ForestConfig, LearnerConfig};
use dml_inference::{
    DgpConfig, DistributionSummary, EstimatorConfig, NuisanceSpec, SimulationArtifact,
    SimulationConfig, StudyConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dmlsim")]
#[command(about = "dmlsim - Monte Carlo study of double machine learning estimators")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one configuration with one strategy
    Simulate {
        /// Observations per dataset
        #[arg(long, default_value = "250")]
        n_obs: usize,

        /// Number of covariates
        #[arg(short, long, default_value = "10")]
        p: usize,

        /// True treatment effect
        #[arg(long, default_value = "0.5")]
        theta: f64,

        /// Toeplitz decay of the covariate covariance, in (0, 1)
        #[arg(long, default_value = "0.5")]
        decay: f64,

        /// Nuisance pair: linear, sigmoid or full
        #[arg(long, default_value = "full")]
        nuisance: String,

        /// Strategy: naive, dml-no-split, dml-split or dml-cross-fit
        #[arg(short, long, default_value = "dml-split")]
        strategy: String,

        /// Learner: random-forest, ridge or oracle
        #[arg(long, default_value = "random-forest")]
        learner: String,

        /// Ridge penalty
        #[arg(long, default_value = "1.0")]
        lambda: f64,

        /// Trees per random forest
        #[arg(long, default_value = "100")]
        n_trees: usize,

        /// Maximum tree depth (default: unlimited)
        #[arg(long)]
        max_depth: Option<usize>,

        /// Minimum observations per leaf
        #[arg(long, default_value = "5")]
        min_samples_leaf: usize,

        /// Number of replicates
        #[arg(long, default_value = "1000")]
        n_sim: usize,

        /// Root seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Moment denominator threshold
        #[arg(long, default_value = "1e-12")]
        epsilon: f64,

        /// Write estimates as CSV to this path
        #[arg(long)]
        estimates: Option<PathBuf>,

        /// Stop starting new replicates after this many seconds
        #[arg(long)]
        time_limit: Option<f64>,

        /// Output file for the JSON result (pretty). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Run a study grid from a JSON config
    Study {
        /// Study config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory for estimates_<strategy>.csv and summary.json
        #[arg(long)]
        out_dir: PathBuf,

        /// Stop starting new replicates after this many seconds
        #[arg(long)]
        time_limit: Option<f64>,

        /// Threads (0 = use the config value)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Summarize an estimates CSV
    Summarize {
        /// Estimates CSV (one column per configuration)
        #[arg(short, long)]
        input: PathBuf,

        /// True treatment effect
        #[arg(long, default_value = "0.5")]
        theta: f64,

        /// Evaluate a Gaussian KDE on this many grid points
        #[arg(long)]
        kde_points: Option<usize>,

        /// Output file for the JSON result (pretty). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Simulate {
            n_obs,
            p,
            theta,
            decay,
            nuisance,
            strategy,
            learner,
            lambda,
            n_trees,
            max_depth,
            min_samples_leaf,
            n_sim,
            seed,
            epsilon,
            estimates,
            time_limit,
            output,
            threads,
        } => {
            let nuisance: NuisanceSpec = nuisance.parse()?;
            let learner = parse_learner(&learner, lambda, n_trees, max_depth, min_samples_leaf)?;
            let config = SimulationConfig {
                label: format!("p={p}"),
                dgp: DgpConfig::new(n_obs, p, theta, decay, nuisance),
                strategy: strategy.parse()?,
                n_sim,
                seed,
                n_threads: threads,
                estimator: EstimatorConfig { moment_epsilon: epsilon },
            };
            cmd_simulate(&config, &learner, estimates.as_ref(), time_limit, output.as_ref())
        }
        Commands::Study { config, out_dir, time_limit, threads } => {
            cmd_study(&config, &out_dir, time_limit, threads)
        }
        Commands::Summarize { input, theta, kde_points, output } => {
            cmd_summarize(&input, theta, kde_points, output.as_ref())
        }
        Commands::Version => {
            println!("dmlsim {}", dml_core::VERSION);
            Ok(())
        }
    }
}

fn parse_learner(
    s: &str,
    lambda: f64,
    n_trees: usize,
    max_depth: Option<usize>,
    min_samples_leaf: usize,
) -> Result<LearnerConfig> {
    match s.to_lowercase().replace('-', "_").as_str() {
        "ridge" => Ok(LearnerConfig::Ridge { lambda }),
        "random_forest" | "forest" | "rf" => Ok(LearnerConfig::RandomForest(ForestConfig {
            n_trees,
            max_depth,
            min_samples_leaf,
            ..ForestConfig::default()
        })),
        "oracle" => Ok(LearnerConfig::Oracle),
        _ => anyhow::bail!("unknown learner '{}': expected random-forest, ridge or oracle", s),
    }
}

/// Stop flag that trips after `limit` seconds, if given.
fn stop_flag(limit: Option<f64>) -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    if let Some(secs) = limit {
        let limit = Duration::try_from_secs_f64(secs).map_err(|_| {
            anyhow::anyhow!("--time-limit must be a non-negative number of seconds, got {secs}")
        })?;
        let flag = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(limit);
            flag.store(true, Ordering::Relaxed);
        });
    }
    Ok(stop)
}

fn cmd_simulate(
    config: &SimulationConfig,
    learner: &LearnerConfig,
    estimates: Option<&PathBuf>,
    time_limit: Option<f64>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let stop = stop_flag(time_limit)?;
    let model = learner.build(config.dgp.nuisance)?;
    tracing::info!(
        label = %config.label,
        strategy = %config.strategy,
        learner = model.name(),
        n_sim = config.n_sim,
        "simulation configured"
    );

    let result = dml_inference::run_simulation(config, model.as_ref(), Some(stop.as_ref()))?;
    tracing::info!(
        completed = result.n_completed(),
        failed = result.n_failed(),
        cancelled = result.n_cancelled,
        wall_s = result.wall_s,
        "simulation complete"
    );

    if let Some(path) = estimates {
        dml_inference::write_estimates_csv_path(path, std::slice::from_ref(&result.distribution))?;
        tracing::info!(path = %path.display(), "estimates written");
    }

    write_json(output, serde_json::to_value(SimulationArtifact::from_result(&result))?)
}

fn cmd_study(
    config: &PathBuf,
    out_dir: &PathBuf,
    time_limit: Option<f64>,
    threads: usize,
) -> Result<()> {
    tracing::info!(path = %config.display(), "loading study config");
    let mut study = StudyConfig::from_path(config)?;
    if threads > 0 {
        study.n_threads = threads;
    }
    tracing::info!(
        configurations = study.p_values.len(),
        strategies = study.strategies.len(),
        n_sim = study.n_sim,
        "study config loaded"
    );

    let stop = stop_flag(time_limit)?;
    let result = dml_inference::run_study(&study, Some(stop.as_ref()))?;
    let written = result.write_to_dir(out_dir)?;
    tracing::info!(files = written.len(), dir = %out_dir.display(), "study complete");

    let files: Vec<String> = written.iter().map(|p| p.display().to_string()).collect();
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "written": files }))?);
    Ok(())
}

fn cmd_summarize(
    input: &PathBuf,
    theta: f64,
    kde_points: Option<usize>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let distributions = dml_inference::read_estimates_csv_path(input)?;
    tracing::info!(path = %input.display(), columns = distributions.len(), "estimates loaded");

    let mut rows = Vec::with_capacity(distributions.len());
    for dist in &distributions {
        let summary = DistributionSummary::from_estimates(&dist.estimates, theta)
            .map_err(|e| anyhow::anyhow!("column '{}': {}", dist.label, e))?;
        let kde = match kde_points {
            Some(n) => Some(dml_inference::gaussian_kde(&dist.estimates, n)?),
            None => None,
        };
        rows.push(serde_json::json!({
            "label": dist.label,
            "summary": summary,
            "kde": kde,
        }));
    }

    write_json(output, serde_json::Value::Array(rows))
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
