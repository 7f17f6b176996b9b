//! Fan-in: job records → per-strategy summary tables.
//!
//! The reducer only reads. It never recomputes a metric, and it refuses to
//! build a table while any expected record is missing: a partial table
//! would silently compare strategies on different combinations.

use std::io::Write;
use std::path::Path;

use csv::Writer;
use tracing::info;

use super::grid::Combination;
use crate::error::{ConfigError, Error, PartialResultError, Result};
use crate::evaluation::{AggregateScores, Metric, MetricSummary};
use crate::store::JobStore;
use crate::types::JobKey;

/// One summary row: a combination and its aggregated scores.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub label: String,
    pub combination: Combination,
    pub scores: AggregateScores,
}

/// All combinations of one strategy, in combination order.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    pub strategy: String,
    pub n_bins: usize,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    /// `params, r2, mse, f1, mcc, mse_bin1.., r2_std, .., mse_binK_std`
    pub fn columns(&self) -> Vec<String> {
        let metrics = Metric::all(self.n_bins);
        let mut columns = vec!["params".to_string()];
        columns.extend(metrics.iter().map(|m| m.column()));
        columns.extend(metrics.iter().map(|m| format!("{}_std", m.column())));
        columns
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let metrics = Metric::all(self.n_bins);
        let mut out = Writer::from_writer(writer);
        out.write_record(self.columns())?;
        for row in &self.rows {
            let summaries: Vec<MetricSummary> = metrics
                .iter()
                .filter_map(|m| row.scores.get(*m))
                .collect();
            let mut record = Vec::with_capacity(1 + 2 * summaries.len());
            record.push(row.label.clone());
            record.extend(summaries.iter().map(|s| cell(s.mean)));
            record.extend(summaries.iter().map(|s| cell(s.std)));
            out.write_record(&record)?;
        }
        out.flush()
            .map_err(|e| Error::io(format!("writing {} summary", self.strategy), e))
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        }
        let file = std::fs::File::create(path)
            .map_err(|e| Error::io(format!("creating {}", path.display()), e))?;
        self.to_writer(file)?;
        info!(strategy = %self.strategy, rows = self.rows.len(), path = %path.display(), "summary written");
        Ok(())
    }

    /// Best row by mean `metric`. Rows where it is undefined are ignored.
    pub fn best_by(&self, metric: Metric) -> Option<&SummaryRow> {
        let better = |a: f64, b: f64| {
            if metric.higher_is_better() {
                a > b
            } else {
                a < b
            }
        };
        let mut best: Option<(&SummaryRow, f64)> = None;
        for row in &self.rows {
            let Some(value) = row.scores.get(metric).map(|s| s.mean) else {
                continue;
            };
            if value.is_nan() {
                continue;
            }
            // First row wins ties
            if best.is_none_or(|(_, b)| better(value, b)) {
                best = Some((row, value));
            }
        }
        best.map(|(row, _)| row)
    }
}

/// Undefined metrics are written as empty cells.
fn cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Write the baseline as a `metric, mean, std` table.
pub fn write_baseline_csv<W: Write>(scores: &AggregateScores, writer: W) -> Result<()> {
    let mut out = Writer::from_writer(writer);
    out.write_record(["metric", "mean", "std"])?;
    for metric in Metric::all(scores.n_bins()) {
        if let Some(s) = scores.get(metric) {
            out.write_record([metric.column(), cell(s.mean), cell(s.std)])?;
        }
    }
    out.flush()
        .map_err(|e| Error::io("writing baseline summary", e))
}

/// Completion counts for one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyStatus {
    pub strategy: String,
    pub expected: usize,
    pub completed: usize,
    pub missing: Vec<JobKey>,
}

impl StrategyStatus {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub struct ResultReducer<'a> {
    store: &'a dyn JobStore,
}

impl<'a> ResultReducer<'a> {
    pub fn new(store: &'a dyn JobStore) -> Self {
        Self { store }
    }

    /// Build the table for `strategy` from exactly the `expected`
    /// combinations (index = position).
    pub fn reduce(&self, strategy: &str, expected: &[Combination]) -> Result<SummaryTable> {
        let mut rows = Vec::with_capacity(expected.len());
        let mut missing = Vec::new();

        for (index, combination) in expected.iter().enumerate() {
            let key = JobKey::new(strategy, index);
            let Some(record) = self.store.get(&key)? else {
                missing.push(key);
                continue;
            };
            if record.combination != *combination {
                return Err(Error::RecordMismatch {
                    key,
                    expected: combination.label(),
                    found: record.combination.label(),
                });
            }
            rows.push(SummaryRow {
                label: combination.label(),
                combination: record.combination,
                scores: record.scores,
            });
        }

        if !missing.is_empty() {
            return Err(PartialResultError {
                strategy: strategy.to_string(),
                expected: expected.len(),
                missing,
            }
            .into());
        }

        let n_bins = rows.first().map(|r| r.scores.n_bins()).unwrap_or(0);
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.scores.n_bins() != n_bins)
        {
            return Err(ConfigError::Invalid(format!(
                "{strategy}_{index} has {} bins, other records have {n_bins}",
                row.scores.n_bins()
            ))
            .into());
        }

        Ok(SummaryTable {
            strategy: strategy.to_string(),
            n_bins,
            rows,
        })
    }

    /// Count completed records without failing on missing ones.
    pub fn status(&self, strategy: &str, expected: usize) -> Result<StrategyStatus> {
        let mut missing = Vec::new();
        for index in 0..expected {
            let key = JobKey::new(strategy, index);
            if !self.store.contains(&key)? {
                missing.push(key);
            }
        }
        Ok(StrategyStatus {
            strategy: strategy.to_string(),
            expected,
            completed: expected - missing.len(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileJobStore;
    use crate::store::fixtures::record;
    use crate::sweep::strategy::StrategyKind;

    fn ro_store(dir: &Path, skip: Option<usize>) -> FileJobStore {
        let store = FileJobStore::new(dir);
        for i in (0..18).filter(|i| Some(*i) != skip) {
            store.put(&record(StrategyKind::Ro, i)).unwrap();
        }
        store
    }

    #[test]
    fn test_missing_record_is_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = ro_store(dir.path(), Some(11));
        let expected = StrategyKind::Ro.default_grid().expand();

        let err = ResultReducer::new(&store).reduce("RO", &expected).unwrap_err();
        match err {
            Error::PartialResult(p) => {
                assert_eq!(p.expected, 18);
                assert_eq!(p.missing, vec![JobKey::new("RO", 11)]);
            }
            other => panic!("expected partial result, got {other}"),
        }
    }

    #[test]
    fn test_full_set_rows_in_combination_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ro_store(dir.path(), None);
        let expected = StrategyKind::Ro.default_grid().expand();

        let table = ResultReducer::new(&store).reduce("RO", &expected).unwrap();
        assert_eq!(table.rows.len(), 18);
        assert_eq!(table.n_bins, 5);
        for (row, combination) in table.rows.iter().zip(&expected) {
            assert_eq!(&row.combination, combination);
            assert_eq!(row.label, combination.label());
        }
        assert_eq!(table.rows[0].label, "(25.0, 72.2, 'balance')");
    }

    #[test]
    fn test_mismatched_combination_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ro_store(dir.path(), None);
        let mut expected = StrategyKind::Ro.default_grid().expand();
        expected.swap(0, 1);

        let err = ResultReducer::new(&store).reduce("RO", &expected).unwrap_err();
        assert!(matches!(err, Error::RecordMismatch { ref key, .. } if *key == JobKey::new("RO", 0)));
    }

    #[test]
    fn test_csv_columns_and_nan_cells() {
        let dir = tempfile::tempdir().unwrap();
        let store = ro_store(dir.path(), None);
        let expected = StrategyKind::Ro.default_grid().expand();
        let table = ResultReducer::new(&store).reduce("RO", &expected).unwrap();

        let mut buf = Vec::new();
        table.to_writer(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "params,r2,mse,f1,mcc,mse_bin1,mse_bin2,mse_bin3,mse_bin4,mse_bin5,\
             r2_std,mse_std,f1_std,mcc_std,mse_bin1_std,mse_bin2_std,mse_bin3_std,\
             mse_bin4_std,mse_bin5_std"
        );
        let first: Vec<&str> = lines.next().unwrap().split("\",").collect();
        assert_eq!(first[0], "\"(25.0, 72.2, 'balance')");
        let cells: Vec<&str> = first[1].split(',').collect();
        assert_eq!(cells.len(), 18);
        // mse_bin3 is undefined in the fixture
        assert_eq!(cells[6], "");
        assert_eq!(cells[15], "");
        assert_eq!(cells[1], "101");
    }

    #[test]
    fn test_best_by_respects_direction() {
        let dir = tempfile::tempdir().unwrap();
        let store = ro_store(dir.path(), None);
        let expected = StrategyKind::Ro.default_grid().expand();
        let table = ResultReducer::new(&store).reduce("RO", &expected).unwrap();

        // Fixture r2 and mse both grow with the index
        assert_eq!(table.best_by(Metric::R2).unwrap().combination, expected[17]);
        assert_eq!(table.best_by(Metric::Mse).unwrap().combination, expected[0]);
        // Constant metric: first row
        assert_eq!(table.best_by(Metric::F1).unwrap().combination, expected[0]);
        // Undefined everywhere
        assert!(table.best_by(Metric::MseBin(2)).is_none());
    }

    #[test]
    fn test_status_counts_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ro_store(dir.path(), Some(3));
        let status = ResultReducer::new(&store).status("RO", 18).unwrap();
        assert_eq!(status.completed, 17);
        assert_eq!(status.missing, vec![JobKey::new("RO", 3)]);
        assert!(!status.is_complete());
    }

    #[test]
    fn test_baseline_table() {
        let scores = record(StrategyKind::Ro, 0).scores;
        let mut buf = Vec::new();
        write_baseline_csv(&scores, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "metric,mean,std");
        assert_eq!(lines.len(), 1 + 4 + 5);
        assert_eq!(lines[7], "mse_bin3,,");
    }
}
