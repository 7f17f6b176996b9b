//! Regression metrics for imbalanced targets.
//!
//! ## Metrics Overview
//!
//! | Metric      | What it measures                                        | Degenerate input    |
//! |-------------|---------------------------------------------------------|---------------------|
//! | R²          | Variance explained                                      | constant truth → 0  |
//! | MSE         | Mean squared error                                      | empty → NaN         |
//! | MSE per bin | MSE restricted to samples whose truth is in the bin     | empty bin → NaN     |
//! | F1 (rel.)   | Precision/recall on relevant values, accurate within ε  | nothing relevant → 0|
//! | MCC (bins)  | Multi-class Matthews correlation of binned values       | one class → 0       |
//!
//! ## Relevance-weighted F1
//!
//! Plain F1 would call a prediction correct whenever truth and prediction
//! agree on being relevant. Here a prediction also has to be accurate:
//!
//! ```text
//! t_i = σ(k·(φ(y_i) − τ))      soft "truly relevant"
//! p_i = σ(k·(φ(ŷ_i) − τ))      soft "predicted relevant"
//! a_i = 1 if |y_i − ŷ_i| < ε   accurate
//!
//! precision = Σ p_i·a_i / Σ p_i
//! recall    = Σ t_i·a_i / Σ t_i
//! ```
//!
//! A large k (default 1e4) makes the relevance cutoff effectively a step.
//! Accuracy is a hard step: an error of exactly ε is a miss. Pairs that are
//! irrelevant on both sides are true negatives and do not enter F1 at all,
//! however far apart they are.
//!
//! ## Aggregation
//!
//! Replicates are summarised by mean and population standard deviation.
//! NaN propagates: a bin that was empty in any replicate reports NaN.

use serde::{Deserialize, Serialize};

use super::relevance::{RelevanceBounds, RelevanceFunction, sigmoid};
use crate::types::BinEdges;

/// Settings for the relevance-weighted F1 score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct F1Config {
    /// Relevance thresholds for scoring (not the resampling thresholds).
    pub bounds: RelevanceBounds,
    /// Cutoff τ on the relevance scale.
    pub relevance_threshold: f64,
    /// A prediction is accurate when its absolute error is below ε.
    pub error_threshold: f64,
    /// Steepness k of the soft relevance cutoff. Only the relevance side is
    /// soft; the accuracy test against ε stays a hard step.
    pub steepness: f64,
}

impl Default for F1Config {
    fn default() -> Self {
        Self {
            bounds: RelevanceBounds::high_const(65.0),
            relevance_threshold: 0.5,
            error_threshold: 5.0,
            steepness: 1e4,
        }
    }
}

/// Named metric, used for table columns and ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    R2,
    Mse,
    F1,
    Mcc,
    /// Zero-based bin index; displayed one-based.
    MseBin(usize),
}

impl Metric {
    pub fn column(&self) -> String {
        match self {
            Metric::R2 => "r2".into(),
            Metric::Mse => "mse".into(),
            Metric::F1 => "f1".into(),
            Metric::Mcc => "mcc".into(),
            Metric::MseBin(i) => format!("mse_bin{}", i + 1),
        }
    }

    /// Whether larger values are better.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, Metric::R2 | Metric::F1 | Metric::Mcc)
    }

    /// Parse a column name such as `f1` or `mse_bin3`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "r2" => Some(Metric::R2),
            "mse" => Some(Metric::Mse),
            "f1" => Some(Metric::F1),
            "mcc" => Some(Metric::Mcc),
            other => {
                let n: usize = other.strip_prefix("mse_bin")?.parse().ok()?;
                n.checked_sub(1).map(Metric::MseBin)
            }
        }
    }

    /// All metrics for `n_bins` bins, in summary column order.
    pub fn all(n_bins: usize) -> Vec<Metric> {
        let mut out = vec![Metric::R2, Metric::Mse, Metric::F1, Metric::Mcc];
        out.extend((0..n_bins).map(Metric::MseBin));
        out
    }
}

/// Scores from one replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateScores {
    pub r2: f64,
    pub mse: f64,
    pub f1: f64,
    pub mcc: f64,
    pub mse_bins: Vec<f64>,
}

/// Mean and population standard deviation of one metric across replicates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
}

impl MetricSummary {
    pub fn of(values: &[f64]) -> Self {
        Self {
            mean: mean(values),
            std: std_dev(values),
        }
    }
}

/// Aggregated scores over all replicates of one combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateScores {
    /// Number of replicates the statistics were computed from.
    pub replicates: usize,
    pub r2: MetricSummary,
    pub mse: MetricSummary,
    pub f1: MetricSummary,
    pub mcc: MetricSummary,
    pub mse_bins: Vec<MetricSummary>,
}

impl AggregateScores {
    /// Aggregate per-replicate scores. All replicates must report the same
    /// number of bins.
    pub fn aggregate(per_replicate: &[ReplicateScores]) -> Self {
        let column = |f: fn(&ReplicateScores) -> f64| -> Vec<f64> {
            per_replicate.iter().map(f).collect()
        };
        let n_bins = per_replicate.first().map(|r| r.mse_bins.len()).unwrap_or(0);
        let mse_bins = (0..n_bins)
            .map(|b| {
                let values: Vec<f64> = per_replicate.iter().map(|r| r.mse_bins[b]).collect();
                MetricSummary::of(&values)
            })
            .collect();

        Self {
            replicates: per_replicate.len(),
            r2: MetricSummary::of(&column(|r| r.r2)),
            mse: MetricSummary::of(&column(|r| r.mse)),
            f1: MetricSummary::of(&column(|r| r.f1)),
            mcc: MetricSummary::of(&column(|r| r.mcc)),
            mse_bins,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.mse_bins.len()
    }

    pub fn get(&self, metric: Metric) -> Option<MetricSummary> {
        match metric {
            Metric::R2 => Some(self.r2),
            Metric::Mse => Some(self.mse),
            Metric::F1 => Some(self.f1),
            Metric::Mcc => Some(self.mcc),
            Metric::MseBin(i) => self.mse_bins.get(i).copied(),
        }
    }
}

/// All four comparison metrics, sharing one set of bin edges.
#[derive(Debug, Clone)]
pub struct MetricSuite {
    edges: BinEdges,
    f1: F1Config,
}

impl MetricSuite {
    pub fn new(edges: BinEdges, f1: F1Config) -> Self {
        Self { edges, f1 }
    }

    /// Score one replicate's predictions.
    pub fn score(&self, y_true: &[f64], y_pred: &[f64]) -> ReplicateScores {
        ReplicateScores {
            r2: r2(y_true, y_pred),
            mse: mse(y_true, y_pred),
            f1: relevance_f1(y_true, y_pred, &self.f1),
            mcc: bin_mcc(y_true, y_pred, &self.edges),
            mse_bins: bin_mse(y_true, y_pred, &self.edges),
        }
    }
}

/// Coefficient of determination.
///
/// Returns 0.0 when `y_true` is empty or constant.
pub fn r2(y_true: &[f64], y_pred: &[f64]) -> f64 {
    debug_assert_eq!(y_true.len(), y_pred.len());
    if y_true.is_empty() {
        return 0.0;
    }
    let m = mean(y_true);
    let ss_tot: f64 = y_true.iter().map(|y| (y - m).powi(2)).sum();
    if ss_tot == 0.0 {
        return 0.0;
    }
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    1.0 - ss_res / ss_tot
}

/// Mean squared error. NaN for empty input.
pub fn mse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    debug_assert_eq!(y_true.len(), y_pred.len());
    if y_true.is_empty() {
        return f64::NAN;
    }
    y_true
        .iter()
        .zip(y_pred)
        .map(|(y, p)| (y - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64
}

/// MSE per bin of the true value. Empty bins are NaN.
pub fn bin_mse(y_true: &[f64], y_pred: &[f64], edges: &BinEdges) -> Vec<f64> {
    let n_bins = edges.n_bins();
    let mut sums = vec![0.0; n_bins];
    let mut counts = vec![0usize; n_bins];
    for (y, p) in y_true.iter().zip(y_pred) {
        let b = edges.bin_of(*y);
        sums[b] += (y - p).powi(2);
        counts[b] += 1;
    }
    sums.into_iter()
        .zip(counts)
        .map(|(s, c)| if c == 0 { f64::NAN } else { s / c as f64 })
        .collect()
}

/// Relevance-weighted F1 (see module docs).
///
/// Relevance of truth and prediction is each fitted on its own values.
pub fn relevance_f1(y_true: &[f64], y_pred: &[f64], config: &F1Config) -> f64 {
    debug_assert_eq!(y_true.len(), y_pred.len());
    let phi_true = RelevanceFunction::fit(config.bounds, y_true).scores(y_true);
    let phi_pred = RelevanceFunction::fit(config.bounds, y_pred).scores(y_pred);

    let soft = |phi: f64| sigmoid(config.steepness * (phi - config.relevance_threshold));

    let mut pred_relevant = 0.0;
    let mut true_relevant = 0.0;
    let mut pred_hits = 0.0;
    let mut true_hits = 0.0;

    for i in 0..y_true.len() {
        let p = soft(phi_pred[i]);
        let t = soft(phi_true[i]);
        let accurate = (y_true[i] - y_pred[i]).abs() < config.error_threshold;

        pred_relevant += p;
        true_relevant += t;
        if accurate {
            pred_hits += p;
            true_hits += t;
        }
    }

    let precision = if pred_relevant > 0.0 {
        pred_hits / pred_relevant
    } else {
        0.0
    };
    let recall = if true_relevant > 0.0 {
        true_hits / true_relevant
    } else {
        0.0
    };

    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Multi-class Matthews correlation of binned truth vs binned prediction.
///
/// ```text
/// MCC = (c·s − Σ p_k·t_k) / √((s² − Σ p_k²)(s² − Σ t_k²))
/// ```
///
/// with c correct, s total, t_k/p_k true/predicted counts of bin k.
/// Returns 0.0 when the denominator vanishes.
pub fn bin_mcc(y_true: &[f64], y_pred: &[f64], edges: &BinEdges) -> f64 {
    let n_bins = edges.n_bins();
    let mut t = vec![0.0; n_bins];
    let mut p = vec![0.0; n_bins];
    let mut correct = 0.0;

    for (y, yp) in y_true.iter().zip(y_pred) {
        let bt = edges.bin_of(*y);
        let bp = edges.bin_of(*yp);
        t[bt] += 1.0;
        p[bp] += 1.0;
        if bt == bp {
            correct += 1.0;
        }
    }

    let s = y_true.len() as f64;
    let pt: f64 = p.iter().zip(&t).map(|(a, b)| a * b).sum();
    let pp: f64 = p.iter().map(|a| a * a).sum();
    let tt: f64 = t.iter().map(|a| a * a).sum();

    let denom = ((s * s - pp) * (s * s - tt)).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (correct * s - pt) / denom
}

// === Utility functions ===

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (ddof = 0).
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
