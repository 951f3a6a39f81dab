//! Persisted outputs of simulation runs.
//!
//! - **CSV**: one column per configuration label, estimates in replicate
//!   order; shorter columns are padded with empty cells.
//! - **JSON**: [`SimulationArtifact`] with the run parameters and summary.
//!
//! # Schema versioning
//!
//! The `schema_version` field tracks breaking changes. Current: `"1.0.0"`.

use std::io::{Read, Write};
use std::path::Path;

use dml_core::{Error, EstimateDistribution, Result};
use serde::{Deserialize, Serialize};

use crate::estimator::Strategy;
use crate::simulation::{ReplicateFailure, SimulationResult};
use crate::summary::DistributionSummary;

/// Current schema version for simulation artifacts.
pub const SCHEMA_VERSION: &str = "1.0.0";

fn csv_error(e: csv::Error) -> Error {
    Error::Io(std::io::Error::other(e))
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Write distributions column-wise; the header row holds the labels.
pub fn write_estimates_csv<W: Write>(writer: W, distributions: &[EstimateDistribution]) -> Result<()> {
    if distributions.is_empty() {
        return Err(Error::Validation("no distributions to write".into()));
    }
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(distributions.iter().map(|d| d.label.as_str())).map_err(csv_error)?;

    let n_rows = distributions.iter().map(EstimateDistribution::len).max().unwrap_or(0);
    for row in 0..n_rows {
        let record: Vec<String> = distributions
            .iter()
            .map(|d| d.estimates.get(row).map(|v| format!("{v:?}")).unwrap_or_default())
            .collect();
        wtr.write_record(&record).map_err(csv_error)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read distributions written by [`write_estimates_csv`].
///
/// Replicate indices are not stored in the file; estimates are renumbered `0..n`.
pub fn read_estimates_csv<R: Read>(reader: R) -> Result<Vec<EstimateDistribution>> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);
    let headers = rdr.headers().map_err(csv_error)?.clone();
    if headers.is_empty() {
        return Err(Error::Validation("estimates CSV has no header".into()));
    }
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
    // Set once a column has seen an empty cell; later values are an error.
    let mut ended = vec![false; headers.len()];

    for (line, record) in rdr.records().enumerate() {
        let record = record.map_err(csv_error)?;
        if record.len() > headers.len() {
            return Err(Error::Validation(format!(
                "row {}: {} cells for {} columns",
                line + 2,
                record.len(),
                headers.len()
            )));
        }
        for (j, column) in columns.iter_mut().enumerate() {
            let cell = record.get(j).unwrap_or("").trim();
            if cell.is_empty() {
                ended[j] = true;
                continue;
            }
            if ended[j] {
                return Err(Error::Validation(format!(
                    "row {}: column '{}' has a value after an empty cell",
                    line + 2,
                    &headers[j]
                )));
            }
            let v: f64 = cell.parse().map_err(|_| {
                Error::Validation(format!(
                    "row {}: column '{}': invalid number '{cell}'",
                    line + 2,
                    &headers[j]
                ))
            })?;
            column.push(v);
        }
    }

    Ok(headers
        .iter()
        .zip(columns)
        .map(|(label, estimates)| EstimateDistribution::from_estimates(label, estimates))
        .collect())
}

/// [`write_estimates_csv`] to a file.
pub fn write_estimates_csv_path(path: &Path, distributions: &[EstimateDistribution]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_estimates_csv(std::io::BufWriter::new(file), distributions)
}

/// [`read_estimates_csv`] from a file.
pub fn read_estimates_csv_path(path: &Path) -> Result<Vec<EstimateDistribution>> {
    let file = std::fs::File::open(path)?;
    read_estimates_csv(std::io::BufReader::new(file))
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// JSON record of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationArtifact {
    /// Schema version for forward compatibility.
    pub schema_version: String,
    /// Configuration label.
    pub label: String,
    /// Strategy.
    pub strategy: Strategy,
    /// Learner name.
    pub learner: String,
    /// Requested replicates.
    pub n_sim: usize,
    /// Replicates with an estimate.
    pub n_completed: usize,
    /// Replicates skipped because of a replicate-level error.
    pub n_failed: usize,
    /// Replicates not started because of cancellation.
    pub n_cancelled: usize,
    /// Wall time in seconds.
    pub wall_s: f64,
    /// Summary of the estimates (absent when no replicate completed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DistributionSummary>,
    /// Failed replicates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ReplicateFailure>,
}

impl SimulationArtifact {
    /// Build from a run; the summary is omitted if it cannot be computed.
    pub fn from_result(result: &SimulationResult) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            label: result.label.clone(),
            strategy: result.strategy,
            learner: result.learner.clone(),
            n_sim: result.n_sim,
            n_completed: result.n_completed(),
            n_failed: result.n_failed(),
            n_cancelled: result.n_cancelled,
            wall_s: result.wall_s,
            summary: result.summary().ok(),
            failures: result.failures.clone(),
        }
    }
}

/// Write any serializable value as pretty JSON with a trailing newline.
pub fn write_json_path<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut out = serde_json::to_string_pretty(value)?;
    out.push('\n');
    std::fs::write(path, out)?;
    Ok(())
}
