//! Common data types for dmlsim

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Column a nuisance learner is fitted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Outcome `Y` (the `g` nuisance).
    Outcome,
    /// Treatment `D` (the `m` nuisance).
    Treatment,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Outcome => f.write_str("Y"),
            Target::Treatment => f.write_str("D"),
        }
    }
}

/// Partial-linear sample: outcome `y`, treatment `d`, covariates `x`.
///
/// `x` is dense row-major (`n_obs × n_covariates`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    n_obs: usize,
    n_covariates: usize,
    x: Vec<f64>,
    y: Vec<f64>,
    d: Vec<f64>,
}

impl Dataset {
    /// Create a dataset from row-major covariates and the two target columns.
    pub fn new(
        n_obs: usize,
        n_covariates: usize,
        x: Vec<f64>,
        y: Vec<f64>,
        d: Vec<f64>,
    ) -> Result<Self> {
        if n_obs == 0 {
            return Err(Error::Validation("dataset must have at least 1 observation".into()));
        }
        if n_covariates == 0 {
            return Err(Error::Validation("dataset must have at least 1 covariate".into()));
        }
        if x.len() != n_obs * n_covariates {
            return Err(Error::Validation(format!(
                "x has wrong length: expected n*p={}, got {}",
                n_obs * n_covariates,
                x.len()
            )));
        }
        if y.len() != n_obs || d.len() != n_obs {
            return Err(Error::Validation(format!(
                "y/d must have length n={n_obs}, got y={} d={}",
                y.len(),
                d.len()
            )));
        }
        if x.iter().chain(&y).chain(&d).any(|v| !v.is_finite()) {
            return Err(Error::Validation("dataset must contain only finite values".into()));
        }
        Ok(Self { n_obs, n_covariates, x, y, d })
    }

    /// Create a dataset from covariate rows.
    pub fn from_rows(rows: Vec<Vec<f64>>, y: Vec<f64>, d: Vec<f64>) -> Result<Self> {
        let n = rows.len();
        let p = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut x = Vec::with_capacity(n * p);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != p {
                return Err(Error::Validation(format!(
                    "x must be rectangular: row {} has len {}, expected {}",
                    i,
                    row.len(),
                    p
                )));
            }
            x.extend(row);
        }
        Self::new(n, p, x, y, d)
    }

    /// Number of observations `N`.
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// Covariate dimension `p`.
    pub fn n_covariates(&self) -> usize {
        self.n_covariates
    }

    /// Covariate row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        let start = i * self.n_covariates;
        &self.x[start..start + self.n_covariates]
    }

    /// Row-major covariates.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Outcome column.
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Treatment column.
    pub fn d(&self) -> &[f64] {
        &self.d
    }

    /// Column for a learner target.
    pub fn target(&self, target: Target) -> &[f64] {
        match target {
            Target::Outcome => &self.y,
            Target::Treatment => &self.d,
        }
    }

    /// All row indices `0..n_obs`.
    pub fn all_rows(&self) -> Vec<usize> {
        (0..self.n_obs).collect()
    }

    /// Check that every index in `rows` addresses an observation.
    pub fn check_rows(&self, rows: &[usize]) -> Result<()> {
        if let Some(&bad) = rows.iter().find(|&&i| i >= self.n_obs) {
            return Err(Error::Validation(format!(
                "row index {bad} out of range for dataset with {} observations",
                self.n_obs
            )));
        }
        Ok(())
    }
}

/// Two-way partition of observation indices.
///
/// Both halves are sorted, disjoint, and together cover `0..n_obs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    first: Vec<usize>,
    second: Vec<usize>,
}

impl Split {
    /// Build a split, checking the partition invariants against `n_obs`.
    pub fn new(mut first: Vec<usize>, mut second: Vec<usize>, n_obs: usize) -> Result<Self> {
        if first.is_empty() || second.is_empty() {
            return Err(Error::Validation("both halves of a split must be non-empty".into()));
        }
        if first.len() + second.len() != n_obs {
            return Err(Error::Validation(format!(
                "split sizes {} + {} do not sum to n_obs={n_obs}",
                first.len(),
                second.len()
            )));
        }
        let mut seen = vec![false; n_obs];
        for &i in first.iter().chain(&second) {
            if i >= n_obs {
                return Err(Error::Validation(format!("split index {i} out of range (n={n_obs})")));
            }
            if seen[i] {
                return Err(Error::Validation(format!("split index {i} appears twice")));
            }
            seen[i] = true;
        }
        first.sort_unstable();
        second.sort_unstable();
        Ok(Self { first, second })
    }

    /// `S1`.
    pub fn first(&self) -> &[usize] {
        &self.first
    }

    /// `S2`.
    pub fn second(&self) -> &[usize] {
        &self.second
    }

    /// `|S1| + |S2|`.
    pub fn n_obs(&self) -> usize {
        self.first.len() + self.second.len()
    }

    /// The same partition with the halves exchanged.
    pub fn swapped(&self) -> Self {
        Self { first: self.second.clone(), second: self.first.clone() }
    }
}

/// Labelled sequence of treatment-effect estimates from one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimateDistribution {
    /// Configuration label (e.g. `p=100`).
    pub label: String,
    /// Estimates in replicate order.
    pub estimates: Vec<f64>,
    /// Replicate index of each estimate (same length as `estimates`).
    pub replicates: Vec<usize>,
}

impl EstimateDistribution {
    /// Empty distribution with a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), estimates: Vec::new(), replicates: Vec::new() }
    }

    /// Distribution from bare estimates; replicates are numbered `0..n`.
    pub fn from_estimates(label: impl Into<String>, estimates: Vec<f64>) -> Self {
        let replicates = (0..estimates.len()).collect();
        Self { label: label.into(), estimates, replicates }
    }

    /// Append the estimate produced by `replicate`.
    pub fn push(&mut self, replicate: usize, estimate: f64) {
        self.replicates.push(replicate);
        self.estimates.push(estimate);
    }

    /// Number of estimates.
    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    /// `true` when no replicate produced an estimate.
    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_dataset() -> Dataset {
        Dataset::from_rows(
            vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
            vec![0.1, 0.2, 0.3],
            vec![1.0, 0.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn test_dataset_rows_and_targets() {
        let ds = small_dataset();
        assert_eq!(ds.n_obs(), 3);
        assert_eq!(ds.n_covariates(), 2);
        assert_eq!(ds.row(1), &[3.0, 4.0]);
        assert_eq!(ds.target(Target::Outcome), &[0.1, 0.2, 0.3]);
        assert_eq!(ds.target(Target::Treatment), &[1.0, 0.0, 1.0]);
        assert!(ds.check_rows(&[0, 2]).is_ok());
        assert!(ds.check_rows(&[3]).is_err());
    }

    #[test]
    fn test_dataset_rejects_ragged_and_non_finite() {
        let ragged = Dataset::from_rows(vec![vec![1.0], vec![1.0, 2.0]], vec![0.0; 2], vec![0.0; 2]);
        assert!(ragged.is_err());
        let nan = Dataset::new(1, 1, vec![f64::NAN], vec![0.0], vec![0.0]);
        assert!(nan.is_err());
        let empty = Dataset::new(0, 1, vec![], vec![], vec![]);
        assert!(empty.is_err());
    }

    #[test]
    fn test_split_rejects_overlap_and_gaps() {
        assert!(Split::new(vec![0, 1], vec![1, 2], 4).is_err());
        assert!(Split::new(vec![0], vec![2], 3).is_err());
        assert!(Split::new(vec![0, 5], vec![1], 3).is_err());
        let s = Split::new(vec![2, 0], vec![1], 3).unwrap();
        assert_eq!(s.first(), &[0, 2]);
        assert_eq!(s.swapped().first(), &[1]);
    }

    #[test]
    fn test_estimate_distribution_push() {
        let mut dist = EstimateDistribution::new("p=10");
        dist.push(3, 0.5);
        dist.push(7, 0.4);
        assert_eq!(dist.len(), 2);
        assert_eq!(dist.replicates, vec![3, 7]);
        assert_eq!(EstimateDistribution::from_estimates("a", vec![1.0, 2.0]).replicates, vec![0, 1]);
    }

    proptest! {
        #[test]
        fn prop_split_from_any_cut_is_a_partition(n in 2usize..200, cut_frac in 0.01f64..0.99) {
            let cut = ((n as f64 * cut_frac) as usize).clamp(1, n - 1);
            let idx: Vec<usize> = (0..n).rev().collect();
            let split = Split::new(idx[..cut].to_vec(), idx[cut..].to_vec(), n).unwrap();
            prop_assert_eq!(split.n_obs(), n);
            let mut all: Vec<usize> = split.first().iter().chain(split.second()).copied().collect();
            all.sort_unstable();
            prop_assert_eq!(all, (0..n).collect::<Vec<_>>());
        }
    }
}
