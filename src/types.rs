//! Core types shared across the harness.
//!
//! - [`Matrix`]: dense row-major feature matrix
//! - [`Dataset`]: immutable (features, target) pairs
//! - [`BinEdges`]: validated thresholds partitioning the target range
//! - [`JobKey`]: (strategy, combination index), the unit-of-work identity

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Dense row-major matrix of f64 features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrix")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl TryFrom<RawMatrix> for Matrix {
    type Error = ConfigError;

    fn try_from(raw: RawMatrix) -> Result<Self, Self::Error> {
        Self::from_flat(raw.rows, raw.cols, raw.data)
    }
}

impl Matrix {
    /// Build from a list of rows. All rows must share one length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ConfigError> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len();
        let mut data = Vec::with_capacity(n * cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(ConfigError::Dataset(format!(
                    "row {i} has {} features, expected {cols}",
                    row.len()
                )));
            }
            data.extend(row);
        }
        Ok(Self {
            rows: n,
            cols,
            data,
        })
    }

    /// Build from a flat row-major buffer.
    pub fn from_flat(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, ConfigError> {
        if rows * cols != data.len() {
            return Err(ConfigError::Dataset(format!(
                "buffer of {} values does not fit {rows}x{cols}",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn nrows(&self) -> usize {
        self.rows
    }

    pub fn ncols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.rows).map(move |i| self.row(i))
    }

    /// Copy the given rows, in the given order, into a new matrix.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            rows: indices.len(),
            cols: self.cols,
            data,
        }
    }

    /// Values of one column, top to bottom.
    pub(crate) fn column_values(&self, col: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.rows).map(move |r| self.data[r * self.cols + col])
    }

    pub(crate) fn map_column(&mut self, col: usize, f: impl Fn(f64) -> f64) {
        for r in 0..self.rows {
            let v = &mut self.data[r * self.cols + col];
            *v = f(*v);
        }
    }
}

/// Ordered (feature row, target) pairs of fixed length.
///
/// Immutable once built; the evaluator only ever reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Matrix,
    targets: Vec<f64>,
}

impl Dataset {
    pub fn new(features: Matrix, targets: Vec<f64>) -> Result<Self, ConfigError> {
        if features.nrows() != targets.len() {
            return Err(ConfigError::Dataset(format!(
                "{} feature rows but {} targets",
                features.nrows(),
                targets.len()
            )));
        }
        if let Some(i) = targets.iter().position(|t| !t.is_finite()) {
            return Err(ConfigError::Dataset(format!("target {i} is not finite")));
        }
        Ok(Self { features, targets })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Feature dimensionality.
    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> &Matrix {
        &self.features
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn into_parts(self) -> (Matrix, Vec<f64>) {
        (self.features, self.targets)
    }

    /// Copy out the rows at `indices` as an owned (features, targets) pair.
    pub fn subset(&self, indices: &[usize]) -> (Matrix, Vec<f64>) {
        let x = self.features.select_rows(indices);
        let y = indices.iter().map(|&i| self.targets[i]).collect();
        (x, y)
    }
}

/// Strictly increasing thresholds splitting the target range into
/// `len + 1` contiguous bins.
///
/// A value equal to an edge belongs to the bin above it. Values below the
/// first edge land in bin 0, values at or above the last in the final bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct BinEdges(Vec<f64>);

impl BinEdges {
    pub fn new(edges: Vec<f64>) -> Result<Self, ConfigError> {
        if edges.is_empty() {
            return Err(ConfigError::EmptyBinEdges);
        }
        for (index, pair) in edges.windows(2).enumerate() {
            // `!(a < b)` also rejects NaN
            if !(pair[0] < pair[1]) {
                return Err(ConfigError::NonIncreasingBinEdges {
                    index: index + 1,
                    previous: pair[0],
                    value: pair[1],
                });
            }
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(ConfigError::Invalid("bin edges must be finite".into()));
        }
        Ok(Self(edges))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Number of bins (`edges + 1`).
    pub fn n_bins(&self) -> usize {
        self.0.len() + 1
    }

    /// Bin index of a single value.
    pub fn bin_of(&self, value: f64) -> usize {
        self.0.partition_point(|&edge| edge <= value)
    }

    /// Bin index of every value.
    pub fn assign(&self, values: &[f64]) -> Vec<usize> {
        values.iter().map(|&v| self.bin_of(v)).collect()
    }
}

impl TryFrom<Vec<f64>> for BinEdges {
    type Error = ConfigError;

    fn try_from(edges: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(edges)
    }
}

impl From<BinEdges> for Vec<f64> {
    fn from(edges: BinEdges) -> Self {
        edges.0
    }
}

/// Identity of one unit of work: a strategy and a combination index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub strategy: String,
    pub index: usize,
}

impl JobKey {
    pub fn new(strategy: impl Into<String>, index: usize) -> Self {
        Self {
            strategy: strategy.into(),
            index,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.strategy, self.index)
    }
}
