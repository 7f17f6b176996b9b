//! Dataset loading from CSV.
//!
//! Every column except the target and any excluded ones is a numeric
//! feature. Features are expected to be prepared already; the optional
//! standardization only rescales each column to zero mean and unit
//! variance.

use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::types::{Dataset, Matrix};

/// Where and how to load the dataset. Part of every job descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatasetSource {
    pub path: PathBuf,
    /// Name of the target column.
    pub target: String,
    /// Columns that are neither features nor the target (ids, raw sequences).
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub standardize: bool,
}

impl DatasetSource {
    pub fn load(&self) -> Result<Dataset> {
        self.load_scaled().map(|(dataset, _)| dataset)
    }

    /// Load, also returning the per-column scaling when standardization is
    /// on, so a saved model can be paired with it.
    pub fn load_scaled(&self) -> Result<(Dataset, Option<Scaler>)> {
        let (dataset, features) = load_csv(&self.path, &self.target, &self.exclude)?;
        info!(
            path = %self.path.display(),
            samples = dataset.len(),
            features = features.len(),
            "loaded dataset"
        );
        if !self.standardize {
            return Ok((dataset, None));
        }
        let (mut x, y) = dataset.into_parts();
        let mut scaler = standardize(&mut x);
        scaler.columns = features;
        Ok((Dataset::new(x, y)?, Some(scaler)))
    }
}

/// Column means and scales applied by [`standardize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    /// Feature column names, when known.
    #[serde(default)]
    pub columns: Vec<String>,
    pub means: Vec<f64>,
    /// Population std of each column; 1.0 for constant columns.
    pub scales: Vec<f64>,
}

/// Read a CSV with a header row. Returns the dataset and the feature
/// column names in file order.
pub fn load_csv(path: &Path, target: &str, exclude: &[String]) -> Result<(Dataset, Vec<String>)> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let target_col = headers
        .iter()
        .position(|h| h == target)
        .ok_or_else(|| ConfigError::Dataset(format!("no target column `{target}`")))?;

    for name in exclude {
        if !headers.iter().any(|h| h == name) {
            return Err(ConfigError::Dataset(format!("no column `{name}` to exclude")).into());
        }
    }

    let feature_cols: Vec<usize> = (0..headers.len())
        .filter(|&i| i != target_col && !exclude.iter().any(|e| e == &headers[i]))
        .collect();
    let feature_names: Vec<String> = feature_cols.iter().map(|&i| headers[i].to_string()).collect();
    debug!(?feature_names, "feature columns");

    let mut rows = Vec::new();
    let mut targets = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        // Header is line 1
        let row_no = line + 2;
        let parse = |col: usize| -> std::result::Result<f64, ConfigError> {
            let raw = record.get(col).unwrap_or("");
            raw.parse::<f64>().map_err(|_| {
                ConfigError::Dataset(format!(
                    "line {row_no}, column `{}`: `{raw}` is not a number",
                    &headers[col]
                ))
            })
        };

        targets.push(parse(target_col)?);
        rows.push(
            feature_cols
                .iter()
                .map(|&c| parse(c))
                .collect::<std::result::Result<Vec<f64>, _>>()?,
        );
    }

    if rows.is_empty() {
        return Err(ConfigError::Dataset(format!("{} has no data rows", path.display())).into());
    }

    let dataset = Dataset::new(Matrix::from_rows(rows)?, targets)?;
    Ok((dataset, feature_names))
}

/// Z-score every column in place (population std). Constant columns are
/// only centred.
pub fn standardize(features: &mut Matrix) -> Scaler {
    let mut scaler = Scaler {
        columns: Vec::new(),
        means: Vec::with_capacity(features.ncols()),
        scales: Vec::with_capacity(features.ncols()),
    };
    let n = features.nrows() as f64;
    if n == 0.0 {
        return scaler;
    }
    for col in 0..features.ncols() {
        let mean = features.column_values(col).sum::<f64>() / n;
        let var = features
            .column_values(col)
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        let scale = if std > 0.0 { std } else { 1.0 };
        features.map_column(col, |v| (v - mean) / scale);
        scaler.means.push(mean);
        scaler.scales.push(scale);
    }
    scaler
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_csv(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_with_exclusions() {
        let (_dir, path) = write_csv(
            "id,seq,a,ogt,topt\n\
             p1,MKV,0.1,37,45.0\n\
             p2,MAA,0.2,80, 88.5\n",
        );
        let (ds, names) = load_csv(&path, "topt", &["id".into(), "seq".into()]).unwrap();
        assert_eq!(names, vec!["a", "ogt"]);
        assert_eq!(ds.targets(), &[45.0, 88.5]);
        assert_eq!(ds.features().row(1), &[0.2, 80.0]);
    }

    #[test]
    fn test_missing_target_column() {
        let (_dir, path) = write_csv("a,b\n1,2\n");
        let err = load_csv(&path, "topt", &[]).unwrap_err();
        assert!(err.to_string().contains("topt"), "got {err}");
    }

    #[test]
    fn test_non_numeric_cell_names_line_and_column() {
        let (_dir, path) = write_csv("a,topt\n1,40\nx,50\n");
        let err = load_csv(&path, "topt", &[]).unwrap_err().to_string();
        assert!(err.contains("line 3"), "got {err}");
        assert!(err.contains("`a`"), "got {err}");
    }

    #[test]
    fn test_standardize_columns() {
        let mut x = Matrix::from_rows(vec![vec![1.0, 5.0], vec![3.0, 5.0]]).unwrap();
        let scaler = standardize(&mut x);
        assert_eq!(x.row(0), &[-1.0, 0.0]);
        assert_eq!(x.row(1), &[1.0, 0.0]);
        assert_eq!(scaler.means, vec![2.0, 5.0]);
        // Constant column keeps unit scale
        assert_eq!(scaler.scales, vec![1.0, 1.0]);
    }

    #[test]
    fn test_source_standardizes_on_request() {
        let (_dir, path) = write_csv("f,t\n2,10\n4,20\n6,30\n");
        let source = DatasetSource {
            path,
            target: "t".into(),
            exclude: vec![],
            standardize: true,
        };
        let ds = source.load().unwrap();
        let col: Vec<f64> = ds.features().rows().map(|r| r[0]).collect();
        assert!(col.iter().sum::<f64>().abs() < 1e-12);
        assert!(col[2] > 1.2 && col[2] < 1.3);
        // Targets untouched
        assert_eq!(ds.targets(), &[10.0, 20.0, 30.0]);

        let (_, scaler) = source.load_scaled().unwrap();
        let scaler = scaler.unwrap();
        assert_eq!(scaler.columns, vec!["f".to_string()]);
        assert_eq!(scaler.means, vec![4.0]);
    }

    #[test]
    fn test_unscaled_source_has_no_scaler() {
        let (_dir, path) = write_csv("f,t\n2,10\n4,20\n");
        let source = DatasetSource {
            path,
            target: "t".into(),
            exclude: vec![],
            standardize: false,
        };
        let (ds, scaler) = source.load_scaled().unwrap();
        assert_eq!(ds.len(), 2);
        assert!(scaler.is_none());
    }
}
