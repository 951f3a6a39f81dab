//! Random-forest regression learner.
//!
//! Bootstrap-aggregated CART regression trees with variance-reduction splits and
//! per-node feature subsampling. Tree `t` is grown from its own `StdRng` seeded
//! from `(fit seed, t)`, so fits are reproducible and independent of threading.

use dml_core::{Dataset, Error, FittedNuisance, NuisanceLearner, Result, Target};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

fn default_n_trees() -> usize {
    100
}

fn default_min_samples_leaf() -> usize {
    5
}

fn default_feature_fraction() -> f64 {
    1.0 / 3.0
}

fn default_bootstrap() -> bool {
    true
}

/// Forest hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees.
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,
    /// Maximum depth (`None` = grow until leaves are pure or too small).
    #[serde(default)]
    pub max_depth: Option<usize>,
    /// Minimum observations per leaf.
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// Fraction of covariates tried at each split, in (0, 1].
    #[serde(default = "default_feature_fraction")]
    pub feature_fraction: f64,
    /// Resample training rows with replacement per tree.
    #[serde(default = "default_bootstrap")]
    pub bootstrap: bool,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: default_n_trees(),
            max_depth: None,
            min_samples_leaf: default_min_samples_leaf(),
            feature_fraction: default_feature_fraction(),
            bootstrap: default_bootstrap(),
        }
    }
}

impl ForestConfig {
    /// Validate hyper-parameters.
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(Error::InvalidConfiguration("n_trees must be > 0".into()));
        }
        if self.min_samples_leaf == 0 {
            return Err(Error::InvalidConfiguration("min_samples_leaf must be > 0".into()));
        }
        if !(self.feature_fraction > 0.0 && self.feature_fraction <= 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "feature_fraction must lie in (0, 1], got {}",
                self.feature_fraction
            )));
        }
        if self.max_depth == Some(0) {
            return Err(Error::InvalidConfiguration("max_depth must be > 0 when set".into()));
        }
        Ok(())
    }

    fn features_per_split(&self, p: usize) -> usize {
        ((p as f64 * self.feature_fraction).ceil() as usize).clamp(1, p)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf(v) => return v,
                Node::Split { feature, threshold, left, right } => {
                    idx = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }
}

/// Training view: gathered rows, row-major.
struct TrainSet {
    p: usize,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl TrainSet {
    #[inline]
    fn value(&self, i: usize, j: usize) -> f64 {
        self.x[i * self.p + j]
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    position: usize,
    score: f64,
}

fn mean_of(train: &TrainSet, idx: &[usize]) -> f64 {
    idx.iter().map(|&i| train.y[i]).sum::<f64>() / idx.len() as f64
}

/// Best variance-reduction split of `idx` over the sampled features.
///
/// Maximises `S_L²/n_L + S_R²/n_R`, which is equivalent to minimising the
/// within-child sum of squares.
fn best_split(
    train: &TrainSet,
    idx: &mut [usize],
    features: &[usize],
    min_leaf: usize,
) -> Option<BestSplit> {
    let n = idx.len();
    let total: f64 = idx.iter().map(|&i| train.y[i]).sum();
    let parent_score = total * total / n as f64;
    let mut best: Option<BestSplit> = None;

    for &feature in features {
        idx.sort_unstable_by(|&a, &b| {
            train.value(a, feature).total_cmp(&train.value(b, feature))
        });
        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += train.y[idx[k - 1]];
            if k < min_leaf || n - k < min_leaf {
                continue;
            }
            let lo = train.value(idx[k - 1], feature);
            let hi = train.value(idx[k], feature);
            if lo >= hi {
                continue;
            }
            let right_sum = total - left_sum;
            let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
            if score > parent_score + 1e-12 && best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(BestSplit { feature, threshold: 0.5 * (lo + hi), position: k, score });
            }
        }
    }
    best
}

fn grow_tree(train: &TrainSet, config: &ForestConfig, seed: u64) -> Tree {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = train.y.len();
    let root: Vec<usize> = if config.bootstrap {
        (0..n).map(|_| rng.random_range(0..n)).collect()
    } else {
        (0..n).collect()
    };
    let mtry = config.features_per_split(train.p);
    let min_leaf = config.min_samples_leaf;

    let mut nodes: Vec<Node> = vec![Node::Leaf(0.0)];
    // (node slot, sample indices, depth)
    let mut stack: Vec<(usize, Vec<usize>, usize)> = vec![(0, root, 0)];

    while let Some((slot, mut idx, depth)) = stack.pop() {
        let leaf_value = mean_of(train, &idx);
        let depth_exhausted = config.max_depth.is_some_and(|d| depth >= d);
        if depth_exhausted || idx.len() < 2 * min_leaf {
            nodes[slot] = Node::Leaf(leaf_value);
            continue;
        }

        let features = rand::seq::index::sample(&mut rng, train.p, mtry).into_vec();
        let Some(split) = best_split(train, &mut idx, &features, min_leaf) else {
            nodes[slot] = Node::Leaf(leaf_value);
            continue;
        };

        // Re-sort by the winning feature: `best_split` leaves `idx` sorted by the last one tried.
        idx.sort_unstable_by(|&a, &b| {
            train.value(a, split.feature).total_cmp(&train.value(b, split.feature))
        });
        let right_idx = idx.split_off(split.position);

        let left = nodes.len();
        let right = left + 1;
        nodes.push(Node::Leaf(0.0));
        nodes.push(Node::Leaf(0.0));
        nodes[slot] = Node::Split { feature: split.feature, threshold: split.threshold, left, right };
        stack.push((right, right_idx, depth + 1));
        stack.push((left, idx, depth + 1));
    }

    Tree { nodes }
}

#[inline]
fn tree_seed(seed: u64, tree: u64) -> u64 {
    seed.wrapping_mul(2654435761).wrapping_add(tree)
}

/// Random-forest regression learner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RandomForestLearner {
    config: ForestConfig,
}

impl RandomForestLearner {
    /// Learner with validated hyper-parameters.
    pub fn new(config: ForestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Hyper-parameters in use.
    pub fn config(&self) -> &ForestConfig {
        &self.config
    }
}

/// Fitted forest.
#[derive(Debug, Clone)]
pub struct ForestFit {
    p: usize,
    trees: Vec<Tree>,
}

impl ForestFit {
    /// Number of trees.
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl FittedNuisance for ForestFit {
    fn predict(&self, data: &Dataset, rows: &[usize]) -> Result<Vec<f64>> {
        if data.n_covariates() != self.p {
            return Err(Error::FitFailure(format!(
                "forest fitted on {} covariates, asked to predict with {}",
                self.p,
                data.n_covariates()
            )));
        }
        data.check_rows(rows)?;
        let inv = 1.0 / self.trees.len() as f64;
        Ok(rows
            .iter()
            .map(|&i| {
                let row = data.row(i);
                self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() * inv
            })
            .collect())
    }
}

impl NuisanceLearner for RandomForestLearner {
    fn name(&self) -> &str {
        "random_forest"
    }

    fn fit(
        &self,
        data: &Dataset,
        rows: &[usize],
        target: Target,
        seed: u64,
    ) -> Result<Box<dyn FittedNuisance>> {
        if rows.is_empty() {
            return Err(Error::FitFailure("random_forest: no training rows".into()));
        }
        data.check_rows(rows)?;

        let p = data.n_covariates();
        let col = data.target(target);
        let mut x = Vec::with_capacity(rows.len() * p);
        for &i in rows {
            x.extend_from_slice(data.row(i));
        }
        let train = TrainSet { p, x, y: rows.iter().map(|&i| col[i]).collect() };

        let trees: Vec<Tree> = (0..self.config.n_trees)
            .into_par_iter()
            .map(|t| grow_tree(&train, &self.config, tree_seed(seed, t as u64)))
            .collect();

        Ok(Box::new(ForestFit { p, trees }))
    }
}
